//! The `leadscore init` command.

use std::path::Path;

use anyhow::Result;

pub fn execute() -> Result<()> {
    write_if_missing(Path::new("leadscore.toml"), SAMPLE_SETTINGS)?;
    write_if_missing(Path::new("tenant.toml"), SAMPLE_TENANT)?;

    std::fs::create_dir_all("leads")?;
    write_if_missing(Path::new("leads/sample.json"), SAMPLE_LEAD)?;

    println!("\nNext steps:");
    println!("  1. Edit tenant.toml with your questions, scoring models and recommendations");
    println!("  2. Run: leadscore validate --config tenant.toml");
    println!("  3. Run: leadscore score --config tenant.toml --lead leads/sample.json");

    Ok(())
}

fn write_if_missing(path: &Path, content: &str) -> Result<()> {
    if path.exists() {
        println!("{} already exists, skipping.", path.display());
    } else {
        std::fs::write(path, content)?;
        println!("Created {}", path.display());
    }
    Ok(())
}

const SAMPLE_SETTINGS: &str = r#"# leadscore settings

# Overrides the tenant's selection_mode: "first_match" or "all_matches"
# selection_mode = "all_matches"
max_steps = 10000
max_depth = 64
require_all_answers = false
reject_unknown_fields = false
parallelism = 4
output_dir = "./leadscore-results"
"#;

const SAMPLE_TENANT: &str = r#"[tenant]
id = "example-lending"
name = "Example Lending"
version = 1
selection_mode = "all_matches"

[[questions]]
number = 1
field_name = "income"
text = "What is your annual income?"
type = "I"

[[questions]]
number = 2
field_name = "credit_score"
text = "What is your credit score?"
type = "I"

[[questions]]
number = 3
field_name = "employment_years"
text = "How many years have you been employed?"
type = "I"

[[questions]]
number = 4
field_name = "employment"
text = "What is your employment status?"
type = "CH"

[[questions.choices]]
text = "Full Time"
slug = "full_time"
points = 8

[[questions.choices]]
text = "Part Time"
slug = "part_time"
points = 3

[[scoring_models]]
id = "income"
field_name = "income"
x_axis = true

[[scoring_models.ranges]]
start = 0
end = 50000
points = 5

[[scoring_models.ranges]]
start = 50000
end = 100000
points = 15

[[scoring_models]]
id = "credit_score"
field_name = "credit_score"
weight = 1.5
y_axis = true

[[scoring_models.ranges]]
start = 700
points = 7

[[scoring_models]]
id = "employment"
field_name = "employment"
x_axis = true

[[recommendations]]
id = "prime"
rule = "{credit_score} > 700 and {employment_years} >= 2"
response_text = "You qualify for our prime rate."
redirect_url = "https://example.com/prime"
priority = 1

[[recommendations]]
id = "high_total"
rule = "{total_score} >= 30"
response_text = "Talk to an advisor about premium products."
priority = 2
"#;

const SAMPLE_LEAD: &str = r#"{
  "external_lead_id": "sample-1",
  "answers": {
    "income": 60000,
    "credit_score": "750",
    "employment_years": 3,
    "employment": "full_time"
  }
}
"#;
