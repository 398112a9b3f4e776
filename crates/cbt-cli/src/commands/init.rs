//! The `cbt init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("cbt.toml").exists() {
        println!("cbt.toml already exists, skipping.");
    } else {
        std::fs::write("cbt.toml", SAMPLE_CONFIG)?;
        println!("Created cbt.toml");
    }

    println!("\nNext steps:");
    println!("  1. Set OPENAI_API_KEY, or point a provider at a local Ollama");
    println!("  2. Run: cbt bank");
    println!("  3. Run: cbt exam --mode topic --level 200 --topic \"Data Structures\"");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# cbt configuration

# Backend used to synthesize questions. Remove to always use the question bank.
default_provider = "openai"
default_model = "gpt-4.1-mini"
temperature = 0.7
# Synthesis is abandoned after this long and the bank is used instead.
generation_timeout_ms = 8000
store_dir = "./cbt-data"
# bank_path = "./bank.toml"
# seed = 42

[providers.openai]
type = "openai"
api_key = "${OPENAI_API_KEY}"

[providers.ollama]
type = "ollama"
base_url = "http://localhost:11434"
"#;
