use ainput::{
    Action, ActionOutput, ActionRequest, DispatchEvent, Dispatcher, ModelProfile, ProviderKind,
    SettingsStore, UsageRecorder,
};
use clap::Subcommand;
use futures::StreamExt;
use std::io::{Read, Write};

#[derive(Subcommand)]
pub enum ProfileCommand {
    /// List configured models (* marks the active one)
    List,

    /// Add a model
    Add {
        /// gemini, openai, anthropic, openrouter or custom
        kind: String,

        #[arg(long)]
        api_key: String,

        /// Display name (default: <kind>-<n>)
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        base_url: Option<String>,

        /// Vendor model string (default depends on the kind)
        #[arg(long)]
        model: Option<String>,
    },

    /// Remove a model
    Remove { id: String },

    /// Make a model active
    Use { id: String },
}

#[derive(Subcommand)]
pub enum SiteCommand {
    /// Hide the AInput control on a site
    Disable { origin: String },
    /// Show the AInput control on a site again
    Enable { origin: String },
    /// Offer auto-reply on a site
    AutoReplyOn { origin: String },
    AutoReplyOff { origin: String },
    /// Print both switches for a site
    Status { origin: String },
}

/// Map free-form CLI input onto the request field the action reads.
pub fn build_request(action: &str, input: String) -> anyhow::Result<ActionRequest> {
    let action = Action::parse(action).ok_or_else(|| anyhow::anyhow!("unknown action: {}", action))?;
    let mut req = ActionRequest::new(action);
    match action {
        Action::AutoReply => req.page_content = Some(input),
        Action::AutoComplete => req.label = Some(input),
        Action::AutoFillForm => anyhow::bail!("autoFillForm needs form fields; use POST /v1/actions"),
        Action::FixGrammar | Action::Translate | Action::EnhancePrompt => req.text = Some(input),
    }
    Ok(req)
}

pub async fn run_action(
    dispatcher: &Dispatcher,
    action: &str,
    text: Option<String>,
    stream: bool,
) -> anyhow::Result<()> {
    let input = match text {
        Some(t) => t,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let req = build_request(action, input)?;

    if stream {
        let mut events = dispatcher.handle_streaming(&req);
        let mut out = std::io::stdout();
        while let Some(event) = events.next().await {
            match event? {
                DispatchEvent::Chunk(chunk) => {
                    write!(out, "{}", chunk)?;
                    out.flush()?;
                }
                DispatchEvent::Done(_) => writeln!(out)?,
            }
        }
    } else {
        match dispatcher.handle(&req).await? {
            ActionOutput::Text(text) => println!("{}", text),
            ActionOutput::Fields(fields) => println!("{}", serde_json::to_string_pretty(&fields)?),
        }
    }

    dispatcher.usage().flush().await;
    Ok(())
}

fn mask_key(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    if key.chars().count() <= 8 {
        return "****".to_string();
    }
    format!("{}****", visible)
}

pub fn profile(settings: &SettingsStore, command: &ProfileCommand) -> anyhow::Result<()> {
    match command {
        ProfileCommand::List => {
            let s = settings.load()?;
            if s.registry.profiles.is_empty() {
                if s.registry.legacy_api_key.is_some() {
                    println!("No models configured; a legacy Gemini API key is in use.");
                } else {
                    println!("No models configured. Add one with `ainput profile add`.");
                }
                return Ok(());
            }
            let active = s.registry.active_profile_id.as_deref();
            for p in &s.registry.profiles {
                let marker = if Some(p.id.as_str()) == active { "*" } else { " " };
                println!(
                    "{} {}  {:<16} {:<11} {:<28} {}  key={}",
                    marker,
                    p.id,
                    p.name,
                    p.provider_kind,
                    p.effective_model().unwrap_or_else(|| "-".into()),
                    p.effective_base_url().unwrap_or_else(|| "-".into()),
                    mask_key(&p.api_key),
                );
            }
        }
        ProfileCommand::Add {
            kind,
            api_key,
            name,
            base_url,
            model,
        } => {
            let kind = ProviderKind::parse(kind);
            if let ProviderKind::Unsupported(tag) = &kind {
                anyhow::bail!("unsupported model type: {}", tag);
            }
            if kind.default_base_url().is_none() && kind != ProviderKind::Gemini && base_url.is_none() {
                anyhow::bail!("{} models need --base-url", kind);
            }
            let id = settings.add_profile(ModelProfile {
                id: String::new(),
                name: name.clone().unwrap_or_default(),
                provider_kind: kind,
                api_key: api_key.clone(),
                base_url: base_url.clone(),
                model_string: model.clone(),
            })?;
            println!("Added model {}", id);
        }
        ProfileCommand::Remove { id } => {
            settings.remove_profile(id)?;
            println!("Removed model {}", id);
        }
        ProfileCommand::Use { id } => {
            settings.set_active_profile(id)?;
            println!("Active model: {}", id);
        }
    }
    Ok(())
}

pub fn site(settings: &SettingsStore, command: &SiteCommand) -> anyhow::Result<()> {
    match command {
        SiteCommand::Disable { origin } => settings.add_disabled_site(origin)?,
        SiteCommand::Enable { origin } => settings.remove_disabled_site(origin)?,
        SiteCommand::AutoReplyOn { origin } => settings.add_auto_reply_site(origin)?,
        SiteCommand::AutoReplyOff { origin } => settings.remove_auto_reply_site(origin)?,
        SiteCommand::Status { origin } => {
            println!(
                "disabled={} autoReply={}",
                settings.is_site_disabled(origin)?,
                settings.is_auto_reply_enabled(origin)?
            );
        }
    }
    Ok(())
}

pub async fn usage(recorder: &UsageRecorder, page: u32, page_size: u32) -> anyhow::Result<()> {
    let result = recorder.page(page, page_size).await?;
    if result.items.is_empty() {
        println!("No usage on page {} ({} records total).", page.max(1), result.total);
        return Ok(());
    }
    for r in &result.items {
        println!(
            "{}  {:<14} {:<28} {:>7}",
            r.date.format("%Y-%m-%d %H:%M:%S"),
            r.kind,
            r.model_id,
            r.tokens
        );
    }
    let total_tokens: u64 = result.items.iter().map(|r| r.tokens).sum();
    println!(
        "page {} | {} records total | {} tokens on this page",
        page.max(1),
        result.total,
        total_tokens
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_goes_to_the_field_each_action_reads() {
        let req = build_request("autoReply", "thread text".into()).unwrap();
        assert_eq!(req.page_content.as_deref(), Some("thread text"));
        assert!(req.text.is_none());

        let req = build_request("translate", "hello".into()).unwrap();
        assert_eq!(req.text.as_deref(), Some("hello"));
        assert_eq!(req.action, "translate");

        assert!(build_request("autoFillForm", String::new()).is_err());
        assert!(build_request("nope", String::new()).is_err());
    }

    #[test]
    fn keys_are_masked() {
        assert_eq!(mask_key("sk-abcdefghijkl"), "sk-a****");
        assert_eq!(mask_key("short"), "****");
    }

    #[test]
    fn adding_a_hosted_model_requires_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::new(dir.path().join("settings.json"));
        let cmd = ProfileCommand::Add {
            kind: "custom".into(),
            api_key: "k".into(),
            name: None,
            base_url: None,
            model: None,
        };
        assert!(profile(&settings, &cmd).is_err());

        let cmd = ProfileCommand::Add {
            kind: "anthropic".into(),
            api_key: "k".into(),
            name: None,
            base_url: None,
            model: None,
        };
        assert!(profile(&settings, &cmd).is_err());

        let cmd = ProfileCommand::Add {
            kind: "openrouter".into(),
            api_key: "k".into(),
            name: None,
            base_url: None,
            model: None,
        };
        profile(&settings, &cmd).unwrap();
        let s = settings.load().unwrap();
        assert_eq!(s.registry.profiles[0].name, "openrouter-1");
        assert_eq!(s.registry.active_profile_id.as_deref(), Some(s.registry.profiles[0].id.as_str()));
    }
}
