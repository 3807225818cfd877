use crate::registry::legacy_profile;
use crate::types::{ModelProfile, RegistryState};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Everything the user configures, as stored in `settings.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(flatten)]
    pub registry: RegistryState,

    /// Target for `translate`. Unset means the built-in default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,

    /// Origins where the floating control is hidden.
    #[serde(default)]
    pub disabled_sites: Vec<String>,

    /// Origins where auto-reply is offered.
    #[serde(default)]
    pub auto_reply_sites: Vec<String>,
}

/// Reads and writes the settings file with an exclusive file lock and atomic
/// replace. Clones share the same change channel.
#[derive(Clone)]
pub struct SettingsStore {
    path: PathBuf,
    changes: Arc<watch::Sender<Settings>>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let initial = match read_settings(&path) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(path = %path.display(), "could not read settings: {e:#}");
                Settings::default()
            }
        };
        let (tx, _) = watch::channel(initial);
        Self {
            path,
            changes: Arc::new(tx),
        }
    }

    /// Store at `~/.ainput/settings.json`.
    pub fn default_path() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(".ainput").join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    fn with_exclusive_lock<T>(&self, f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
        // Only a directory created here is made private.
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
                }
            }
        }

        let lock_file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.lock_path())?;

        lock_file.lock_exclusive()?;
        let out = f();
        let _ = lock_file.unlock();
        out
    }

    /// Fold a pre-profile bare Gemini key into a real profile.
    fn migrate_legacy(mut settings: Settings) -> Settings {
        let reg = &mut settings.registry;
        if !reg.profiles.is_empty() {
            return settings;
        }
        let Some(key) = reg.legacy_api_key.take() else {
            return settings;
        };
        let key = key.trim();
        if key.is_empty() {
            return settings;
        }

        let mut profile = legacy_profile(key);
        profile.id = uuid::Uuid::new_v4().to_string();
        reg.active_profile_id = Some(profile.id.clone());
        reg.profiles.push(profile);
        tracing::info!("migrated legacy API key into a Gemini profile");
        settings
    }

    /// Current settings; defaults when the file does not exist. Never migrates.
    pub fn load(&self) -> anyhow::Result<Settings> {
        self.with_exclusive_lock(|| read_settings(&self.path))
    }

    /// Replace the whole file. A legacy key is migrated on the way out.
    pub fn save(&self, settings: &Settings) -> anyhow::Result<()> {
        self.with_exclusive_lock(|| self.save_unlocked(settings.clone()))
    }

    /// Read-modify-write under one lock.
    pub fn update<T>(&self, f: impl FnOnce(&mut Settings) -> anyhow::Result<T>) -> anyhow::Result<T> {
        self.with_exclusive_lock(|| {
            let mut settings = Self::migrate_legacy(read_settings(&self.path)?);
            let out = f(&mut settings)?;
            self.save_unlocked(settings)?;
            Ok(out)
        })
    }

    /// Receiver that sees every successful save.
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.changes.subscribe()
    }

    fn save_unlocked(&self, settings: Settings) -> anyhow::Result<()> {
        let settings = Self::migrate_legacy(settings);
        let json = serde_json::to_string_pretty(&settings)?;

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600));
        }
        fs::rename(&tmp_path, &self.path)?;

        self.changes.send_replace(settings);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Profiles
    // -----------------------------------------------------------------------

    /// Add a profile and return its id. Blank ids and names are filled in;
    /// the first profile added becomes active.
    pub fn add_profile(&self, mut profile: ModelProfile) -> anyhow::Result<String> {
        self.update(|s| {
            let reg = &mut s.registry;
            if profile.id.trim().is_empty() {
                profile.id = uuid::Uuid::new_v4().to_string();
            } else if reg.profiles.iter().any(|p| p.id == profile.id) {
                anyhow::bail!("model already exists: {}", profile.id);
            }
            if profile.name.trim().is_empty() {
                let n = reg
                    .profiles
                    .iter()
                    .filter(|p| p.provider_kind == profile.provider_kind)
                    .count()
                    + 1;
                profile.name = format!("{}-{}", profile.provider_kind, n);
            }

            let id = profile.id.clone();
            reg.profiles.push(profile);
            if reg.active_profile_id.as_deref().is_none_or(str::is_empty) {
                reg.active_profile_id = Some(id.clone());
            }
            Ok(id)
        })
    }

    /// Remove a profile. Removing the active one leaves no model selected.
    pub fn remove_profile(&self, id: &str) -> anyhow::Result<()> {
        self.update(|s| {
            let reg = &mut s.registry;
            let before = reg.profiles.len();
            reg.profiles.retain(|p| p.id != id);
            if reg.profiles.len() == before {
                anyhow::bail!("model not found: {}", id);
            }
            if reg.active_profile_id.as_deref() == Some(id) {
                reg.active_profile_id = None;
            }
            Ok(())
        })
    }

    pub fn set_active_profile(&self, id: &str) -> anyhow::Result<()> {
        self.update(|s| {
            let reg = &mut s.registry;
            if !reg.profiles.iter().any(|p| p.id == id) {
                anyhow::bail!("model not found: {}", id);
            }
            reg.active_profile_id = Some(id.to_string());
            Ok(())
        })
    }

    /// Set (or, with a blank value, clear) the translation target.
    pub fn set_target_language(&self, language: &str) -> anyhow::Result<()> {
        let language = language.trim();
        self.update(|s| {
            s.target_language = (!language.is_empty()).then(|| language.to_string());
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Site lists
    // -----------------------------------------------------------------------

    pub fn add_disabled_site(&self, site: &str) -> anyhow::Result<()> {
        let origin = normalize_origin(site)?;
        self.update(|s| {
            insert_unique(&mut s.disabled_sites, origin);
            Ok(())
        })
    }

    pub fn remove_disabled_site(&self, site: &str) -> anyhow::Result<()> {
        let origin = normalize_origin(site)?;
        self.update(|s| {
            s.disabled_sites.retain(|o| *o != origin);
            Ok(())
        })
    }

    pub fn is_site_disabled(&self, site: &str) -> anyhow::Result<bool> {
        let origin = normalize_origin(site)?;
        Ok(self.load()?.disabled_sites.contains(&origin))
    }

    pub fn add_auto_reply_site(&self, site: &str) -> anyhow::Result<()> {
        let origin = normalize_origin(site)?;
        self.update(|s| {
            insert_unique(&mut s.auto_reply_sites, origin);
            Ok(())
        })
    }

    pub fn remove_auto_reply_site(&self, site: &str) -> anyhow::Result<()> {
        let origin = normalize_origin(site)?;
        self.update(|s| {
            s.auto_reply_sites.retain(|o| *o != origin);
            Ok(())
        })
    }

    pub fn is_auto_reply_enabled(&self, site: &str) -> anyhow::Result<bool> {
        let origin = normalize_origin(site)?;
        Ok(self.load()?.auto_reply_sites.contains(&origin))
    }
}

fn read_settings(path: &Path) -> anyhow::Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn insert_unique(list: &mut Vec<String>, origin: String) {
    if !list.contains(&origin) {
        list.push(origin);
    }
}

/// Reduce a URL (or bare host) to `scheme://host[:port]`.
pub fn normalize_origin(site: &str) -> anyhow::Result<String> {
    let site = site.trim();
    let parsed = url::Url::parse(site)
        .ok()
        .filter(|u| u.has_host())
        .map(Ok)
        .unwrap_or_else(|| url::Url::parse(&format!("https://{}", site)))?;

    let origin = parsed.origin();
    if !origin.is_tuple() {
        anyhow::bail!("not a web origin: {}", site);
    }
    Ok(origin.ascii_serialization())
}
