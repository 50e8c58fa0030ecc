use riskledger_config::RiskLedgerConfig;
use riskledger_core::{LedgerError, Result};
use std::path::{Path, PathBuf};

pub(super) fn cmd_init(local: bool) -> Result<()> {
    let dir = if local {
        std::env::current_dir()?
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".riskledger")
    };

    std::fs::create_dir_all(&dir)?;
    let config_path = dir.join("riskledger.toml");

    if config_path.exists() {
        println!("⚠️  {} already exists", config_path.display());
        println!("   Run 'riskledger set <key> <value>' to change individual settings.");
        return Ok(());
    }

    let body = toml::to_string_pretty(&RiskLedgerConfig::default())
        .map_err(|e| LedgerError::Configuration(e.to_string()))?;
    let contents = format!("# riskledger configuration\n# Run 'riskledger doctor' after editing.\n\n{body}");
    std::fs::write(&config_path, contents)?;

    println!("✅ Created {}", config_path.display());
    Ok(())
}

pub(super) fn cmd_config_set(path: &Path, key: &str, value: &str) -> Result<()> {
    if !path.exists() {
        return Err(LedgerError::Configuration(
            "No config file found. Run 'riskledger init' first.".into(),
        ));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        LedgerError::Configuration(format!("Cannot read {}: {}", path.display(), e))
    })?;

    let mut doc = content.parse::<toml_edit::DocumentMut>().map_err(|e| {
        LedgerError::Configuration(format!("Invalid TOML in {}: {}", path.display(), e))
    })?;

    // Parse dot-notation key into table path, e.g. "store.fail_mode" → ["store", "fail_mode"]
    let parts: Vec<&str> = key.split('.').filter(|p| !p.is_empty()).collect();
    let Some((leaf_key, table_parts)) = parts.split_last() else {
        return Err(LedgerError::Configuration("Empty key".into()));
    };

    let mut table: &mut toml_edit::Item = doc.as_item_mut();
    for part in table_parts {
        if table.get(part).is_none() {
            table[part] = toml_edit::Item::Table(toml_edit::Table::new());
        }
        table = &mut table[part];
    }

    // Infer the value type: bool, integer, float, or string
    let toml_value = if value == "true" {
        toml_edit::value(true)
    } else if value == "false" {
        toml_edit::value(false)
    } else if let Ok(i) = value.parse::<i64>() {
        toml_edit::value(i)
    } else if let Ok(f) = value.parse::<f64>() {
        toml_edit::value(f)
    } else {
        toml_edit::value(value)
    };

    let old_value = table.get(*leaf_key).map(|v| v.to_string());
    table[*leaf_key] = toml_value;

    // Refuse to write a document the loader would reject.
    let updated = doc.to_string();
    let parsed: RiskLedgerConfig = toml::from_str(&updated)
        .map_err(|e| LedgerError::Configuration(format!("{key} = {value} is not valid: {e}")))?;
    parsed.validate().map_err(LedgerError::Configuration)?;

    std::fs::write(path, updated).map_err(|e| {
        LedgerError::Configuration(format!("Cannot write {}: {}", path.display(), e))
    })?;

    match old_value {
        Some(old) => println!("✅ {} = {} (was {})", key, value, old.trim()),
        None => println!("✅ {key} = {value} (new)"),
    }

    Ok(())
}
