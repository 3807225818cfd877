use ainput::usage::{UsageStore, default_usage_db_path};
use ainput::{Providers, SettingsStore, SqliteUsageStore, resolve_active_model};
use std::path::PathBuf;
use std::time::Instant;

const PING_PROMPT: &str = "Reply with the single word OK.";

/// Check settings, the usage database and the active model. Pings the vendor
/// directly so the check itself is not recorded as usage.
pub async fn run_doctor(settings: &SettingsStore, usage_db: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Settings: {}", settings.path().display());
    let s = match settings.load() {
        Ok(s) => s,
        Err(e) => {
            println!("  ❌ Could not read settings: {:#}", e);
            return Ok(());
        }
    };
    println!(
        "  ✅ {} model(s), {} disabled site(s), {} auto-reply site(s)",
        s.registry.profiles.len(),
        s.disabled_sites.len(),
        s.auto_reply_sites.len()
    );

    let db = usage_db.unwrap_or_else(default_usage_db_path);
    println!("Usage database: {}", db.display());
    match SqliteUsageStore::open(&db).and_then(|store| store.count()) {
        Ok(n) => println!("  ✅ {} record(s)", n),
        Err(e) => println!("  ❌ {}", e),
    }

    let profile = match resolve_active_model(&s.registry) {
        Ok(p) => p,
        Err(e) => {
            println!("Active model:\n  ❌ {}", e);
            return Ok(());
        }
    };
    println!(
        "Active model: {} ({}, {})",
        profile.name,
        profile.provider_kind,
        profile.effective_model().unwrap_or_else(|| "-".into())
    );

    let provider = match Providers::new().for_kind(&profile.provider_kind) {
        Ok(p) => p,
        Err(e) => {
            println!("  ❌ {}", e);
            return Ok(());
        }
    };

    let started = Instant::now();
    match provider.invoke(PING_PROMPT, &profile).await {
        Ok(c) => println!(
            "  ✅ {:?} in {} ms, tokens={}",
            c.text.trim(),
            started.elapsed().as_millis(),
            c.tokens_used.map(|t| t.to_string()).unwrap_or_else(|| "n/a".into())
        ),
        Err(e) => println!("  ❌ {}", e),
    }

    println!("\nDoctor check complete.");
    Ok(())
}
