use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use forge_core::BranchName;
use forge_git::GitRepository;
use forge_session::{ModelStream, RepoEventBus, SessionRegistry, StreamEvent, TurnExecutor, TurnLimits, TurnOutcome};
use forge_tools::{register_user_tools, standard_registry, ApprovalStore};

use crate::config::Config;

/// A canned model stream for local exercising of one turn without a
/// live provider connection — the CLI's answer to `dk-cli`'s own
/// offline smoke-test mode, not something a real agent loop would use.
struct ScriptedModel {
    reply: Option<String>,
}

#[async_trait]
impl ModelStream for ScriptedModel {
    async fn send(&mut self, _blocks: Vec<forge_session::Block>) -> forge_core::Result<()> {
        Ok(())
    }

    async fn next_event(&mut self) -> forge_core::Result<StreamEvent> {
        match self.reply.take() {
            Some(text) => Ok(StreamEvent::TextDelta(text)),
            None => Ok(StreamEvent::Done),
        }
    }

    fn cancel(&mut self) {}
}

pub fn run(repo: Option<PathBuf>, branch: String, message: String) -> Result<()> {
    let root = match repo {
        Some(p) => p,
        None => crate::util::discover_repo_root()?,
    };
    let git = Arc::new(GitRepository::open(&root).with_context(|| format!("'{}' is not a forge repository", root.display()))?);
    let config = Config::load(&root)?;
    let branch = BranchName::new(branch)?;

    let events = Arc::new(RepoEventBus::new());
    let registry = Arc::new(SessionRegistry::new(git, events));
    let session = registry.get_or_create(&branch, &message)?;

    let mut tools = standard_registry();
    register_user_tools(&mut tools, &config.tools_dir(&root));

    let approvals_path = root.join(".forge").join("approved_tools.json");
    let approvals = ApprovalStore::load_from_path(&approvals_path)?;

    let limits = TurnLimits {
        max_model_retries: config.tools.retry_bound,
        tool_timeout: std::time::Duration::from_secs(config.tools.timeout_secs),
    };
    let executor = TurnExecutor::new(session, registry, Arc::new(tools), approvals, limits);

    let rt = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let outcome = rt.block_on(async {
        let mut model = ScriptedModel { reply: Some(format!("acknowledged: {message}")) };
        executor.run(&mut model, Some(message)).await
    });

    match outcome {
        TurnOutcome::Idle => println!("{}", "turn finished, session idle".green()),
        TurnOutcome::Completed => println!("{}", "turn finished, session completed".green()),
        TurnOutcome::Error(e) => {
            println!("{} {e}", "turn failed:".red());
            std::process::exit(1);
        }
    }
    Ok(())
}
