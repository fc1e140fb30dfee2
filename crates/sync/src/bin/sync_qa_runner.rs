use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use snafu::{OptionExt, ResultExt, Snafu};
use threadline_backend::{
    ChannelId, Conversation, ConversationId, LiveDelivery, MemoryBackend, Participant,
    StoredMessage, UserId,
};
use threadline_sync::{
    ConversationSyncCore, DeliveryOutcome, OpenOutcome, SettingsStore, SyncError, SyncSettings,
};
use tracing_subscriber::EnvFilter;

const BUYER: &str = "qa-buyer";
const FIRST: &str = "qa-first";
const SECOND: &str = "qa-second";

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    HistoryLiveDuplicate,
    UnknownConversation,
    SwitchIsolation,
    BlankSend,
    ReopenReset,
    ConcurrentOpen,
    OptimisticEcho,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "history_live_duplicate" => Some(Self::HistoryLiveDuplicate),
            "unknown_conversation" => Some(Self::UnknownConversation),
            "switch_isolation" => Some(Self::SwitchIsolation),
            "blank_send" => Some(Self::BlankSend),
            "reopen_reset" => Some(Self::ReopenReset),
            "concurrent_open" => Some(Self::ConcurrentOpen),
            "optimistic_echo" => Some(Self::OptimisticEcho),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::HistoryLiveDuplicate => "history_live_duplicate",
            Self::UnknownConversation => "unknown_conversation",
            Self::SwitchIsolation => "switch_isolation",
            Self::BlankSend => "blank_send",
            Self::ReopenReset => "reopen_reset",
            Self::ConcurrentOpen => "concurrent_open",
            Self::OptimisticEcho => "optimistic_echo",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RunnerFlag {
    Scenario,
    Config,
}

impl RunnerFlag {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "--scenario" => Some(Self::Scenario),
            "--config" => Some(Self::Config),
            _ => None,
        }
    }

    fn flag(&self) -> &'static str {
        match self {
            Self::Scenario => "--scenario",
            Self::Config => "--config",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("sync call failed: {source}"))]
    Sync {
        stage: &'static str,
        source: SyncError,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());

    let settings = match args.config_path.as_ref() {
        Some(path) => {
            println!("config_path={}", path.display());
            SettingsStore::new(path.clone()).settings().as_ref().clone()
        }
        None => SyncSettings::default(),
    };

    match args.scenario {
        Scenario::HistoryLiveDuplicate => run_history_live_duplicate(&settings).await,
        Scenario::UnknownConversation => run_unknown_conversation(&settings).await,
        Scenario::SwitchIsolation => run_switch_isolation(&settings).await,
        Scenario::BlankSend => run_blank_send(&settings).await,
        Scenario::ReopenReset => run_reopen_reset(&settings).await,
        Scenario::ConcurrentOpen => run_concurrent_open(&settings).await,
        Scenario::OptimisticEcho => run_optimistic_echo(&settings).await,
        Scenario::All => run_all(&settings).await,
    }
}

/// Accepts both `--flag value` and `--flag=value`.
fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let args = args.into_iter().collect::<Vec<_>>();
    let mut scenario = None;
    let mut config_path = None;
    let mut rest = args.as_slice();

    while let [flag, tail @ ..] = rest {
        let (name, inline) = match flag.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (flag.as_str(), None),
        };
        let option = RunnerFlag::parse(name).context(UnknownArgumentSnafu {
            stage: "parse-args",
            raw: flag.clone(),
        })?;

        let value = match (inline, tail) {
            (Some(value), _) => {
                rest = tail;
                value
            }
            (None, [value, after @ ..]) => {
                rest = after;
                value.clone()
            }
            (None, []) => {
                return MissingArgumentValueSnafu {
                    stage: "parse-args-value",
                    arg: option.flag(),
                }
                .fail();
            }
        };

        match option {
            RunnerFlag::Scenario => {
                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value.clone(),
                })?;
                scenario = Some(parsed);
            }
            RunnerFlag::Config => config_path = Some(PathBuf::from(value)),
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.context(MissingScenarioSnafu {
            stage: "parse-args-scenario-required",
        })?,
        config_path,
    })
}

async fn run_all(settings: &SyncSettings) -> RunnerResult<()> {
    run_history_live_duplicate(settings).await?;
    run_unknown_conversation(settings).await?;
    run_switch_isolation(settings).await?;
    run_blank_send(settings).await?;
    run_reopen_reset(settings).await?;
    run_concurrent_open(settings).await?;
    run_optimistic_echo(settings).await?;
    println!("all_passed=true");
    Ok(())
}

async fn run_history_live_duplicate(settings: &SyncSettings) -> RunnerResult<()> {
    let (backend, core) = fixture(settings).await?;
    open(&core, FIRST, "scenario-history-open").await?;
    let history_len = core.snapshot().await.entries.len();
    let history_watermark = core.watermark().await;

    backend.publish(delivery(&core, FIRST, "s1", "yo", 250));
    let accepted = core.drain_deliveries().await;
    backend.publish(delivery(&core, FIRST, "s2", "dup", 200));
    let duplicate = core.drain_deliveries().await;

    let snapshot = core.snapshot().await;
    println!("history_len={history_len}");
    println!("history_watermark={history_watermark}");
    println!("final_len={}", snapshot.entries.len());
    println!("final_watermark={}", snapshot.watermark);

    let ok = history_len == 2
        && history_watermark == 200
        && accepted.iter().all(DeliveryOutcome::is_accepted)
        && duplicate == vec![DeliveryOutcome::Stale { watermark: 250 }]
        && snapshot.entries.len() == 3
        && snapshot.watermark == 250;
    finish("history_live_duplicate", ok, "log did not match history + live merge")
}

async fn run_unknown_conversation(settings: &SyncSettings) -> RunnerResult<()> {
    let (backend, core) = fixture(settings).await?;
    let outcome = core.open_conversation(&ConversationId::new("X")).await;
    let rejected = matches!(outcome, Err(SyncError::UnknownConversation { .. }));
    let untouched = core.snapshot().await.conversation.is_none() && backend.subscriber_count() == 0;

    println!("unknown_rejected={rejected}");
    println!("state_untouched={untouched}");
    finish(
        "unknown_conversation",
        rejected && untouched,
        "unknown conversation mutated state or was accepted",
    )
}

async fn run_switch_isolation(settings: &SyncSettings) -> RunnerResult<()> {
    let (backend, core) = fixture(settings).await?;
    open(&core, FIRST, "scenario-switch-open-first").await?;
    backend.publish(delivery(&core, FIRST, "s1", "late", 9_999));
    open(&core, SECOND, "scenario-switch-open-second").await?;

    let outcomes = core.drain_deliveries().await;
    let leaked = core
        .snapshot()
        .await
        .entries
        .iter()
        .any(|entry| entry.text == "late");

    println!("subscriber_count={}", backend.subscriber_count());
    println!("stale_channel_leaked={leaked}");
    finish(
        "switch_isolation",
        !leaked
            && outcomes == vec![DeliveryOutcome::ChannelMismatch]
            && backend.subscriber_count() == 1,
        "delivery for the previous conversation reached the new log",
    )
}

async fn run_blank_send(settings: &SyncSettings) -> RunnerResult<()> {
    let (backend, core) = fixture(settings).await?;
    open(&core, FIRST, "scenario-blank-open").await?;

    let outcome = core
        .send_message(&ConversationId::new(FIRST), &UserId::new(BUYER), "   ")
        .await;
    let refused = matches!(outcome, Err(SyncError::EmptyMessage { .. }));
    let store_untouched = backend.history_of(&ConversationId::new(FIRST)).len() == 2;

    println!("blank_refused={refused}");
    println!("store_untouched={store_untouched}");
    finish(
        "blank_send",
        refused && store_untouched,
        "blank message reached the store",
    )
}

async fn run_reopen_reset(settings: &SyncSettings) -> RunnerResult<()> {
    let (backend, core) = fixture(settings).await?;
    open(&core, FIRST, "scenario-reopen-first").await?;
    backend.publish(delivery(&core, FIRST, "s1", "ephemeral", 900));
    core.drain_deliveries().await;
    open(&core, SECOND, "scenario-reopen-second").await?;
    open(&core, FIRST, "scenario-reopen-first-again").await?;

    let snapshot = core.snapshot().await;
    println!("reopened_len={}", snapshot.entries.len());
    println!("reopened_watermark={}", snapshot.watermark);
    finish(
        "reopen_reset",
        snapshot.entries.len() == 2 && snapshot.watermark == 200,
        "reopened conversation carried in-memory state over",
    )
}

async fn run_concurrent_open(settings: &SyncSettings) -> RunnerResult<()> {
    let (backend, core) = fixture(settings).await?;
    backend.delay_history(&ConversationId::new(FIRST), Duration::from_millis(200));

    let slow = tokio::spawn({
        let core = core.clone();
        async move { core.open_conversation(&ConversationId::new(FIRST)).await }
    });
    while core.generation() == 0 {
        tokio::task::yield_now().await;
    }
    open(&core, SECOND, "scenario-concurrent-open-second").await?;

    let slow = match slow.await {
        Ok(outcome) => outcome.context(SyncSnafu {
            stage: "scenario-concurrent-open-first",
        })?,
        Err(error) => {
            return ScenarioFailedSnafu {
                stage: "scenario-concurrent-join",
                scenario: "concurrent_open",
                reason: error.to_string(),
            }
            .fail();
        }
    };

    let superseded = matches!(slow, OpenOutcome::Superseded { .. });
    let current = core.current_conversation().await;
    println!("first_superseded={superseded}");
    println!("subscriber_count={}", backend.subscriber_count());
    finish(
        "concurrent_open",
        superseded
            && current == Some(ConversationId::new(SECOND))
            && backend.subscriber_count() == 1,
        "earlier open survived a later one",
    )
}

async fn run_optimistic_echo(settings: &SyncSettings) -> RunnerResult<()> {
    let settings = settings.clone().with_optimistic_echo(true);
    let (_backend, core) = fixture(&settings).await?;
    open(&core, FIRST, "scenario-optimistic-open").await?;

    core.send_message(&ConversationId::new(FIRST), &UserId::new(BUYER), "instant")
        .await
        .context(SyncSnafu {
            stage: "scenario-optimistic-send",
        })?;
    let before_echo = core.snapshot().await.entries.len();
    let echo = core.drain_deliveries().await;
    let after_echo = core.snapshot().await.entries.len();

    println!("before_echo={before_echo}");
    println!("after_echo={after_echo}");
    finish(
        "optimistic_echo",
        before_echo == 3
            && after_echo == 3
            && echo.iter().all(|outcome| matches!(outcome, DeliveryOutcome::Stale { .. })),
        "optimistic append duplicated the echo",
    )
}

async fn fixture(
    settings: &SyncSettings,
) -> RunnerResult<(MemoryBackend, Arc<ConversationSyncCore>)> {
    let backend = MemoryBackend::with_channel_prefix(&settings.channel_prefix);
    let buyer = Participant::new(BUYER, "Quinn Buyer", "quinn");
    backend.insert_conversation(Conversation::new(
        FIRST,
        buyer.clone(),
        Participant::new("qa-seller-one", "Rowan Seller", "rowan"),
    ));
    backend.insert_conversation(Conversation::new(
        SECOND,
        buyer,
        Participant::new("qa-seller-two", "Sasha Seller", "sasha"),
    ));
    backend.seed_history(
        &ConversationId::new(FIRST),
        vec![
            StoredMessage::new("s1", "hi", 100),
            StoredMessage::new("s2", "hey", 200),
        ],
    );

    let core = Arc::new(ConversationSyncCore::new(
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        settings.clone(),
    ));
    core.refresh_conversations(&UserId::new(BUYER))
        .await
        .context(SyncSnafu {
            stage: "fixture-refresh-conversations",
        })?;
    Ok((backend, core))
}

async fn open(
    core: &ConversationSyncCore,
    conversation: &str,
    stage: &'static str,
) -> RunnerResult<OpenOutcome> {
    core.open_conversation(&ConversationId::new(conversation))
        .await
        .context(SyncSnafu { stage })
}

fn delivery(
    core: &ConversationSyncCore,
    conversation: &str,
    sender: &str,
    text: &str,
    timestamp: u64,
) -> LiveDelivery {
    let channel: ChannelId = core.channel_for(&ConversationId::new(conversation));
    LiveDelivery::new(channel, sender, text, timestamp)
}

fn finish(scenario: &'static str, ok: bool, reason: &str) -> RunnerResult<()> {
    if !ok {
        return ScenarioFailedSnafu {
            stage: "scenario-verdict",
            scenario,
            reason: reason.to_string(),
        }
        .fail();
    }
    println!("{scenario}=true");
    println!("runner_ok=true");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn flags_accept_separate_and_inline_values() {
        let parsed = parse_args(args(&["--scenario", "blank_send", "--config=/tmp/qa.json"]))
            .expect("valid arguments");

        assert!(matches!(parsed.scenario, Scenario::BlankSend));
        assert_eq!(parsed.config_path, Some(PathBuf::from("/tmp/qa.json")));
    }

    #[test]
    fn invalid_arguments_are_reported() {
        assert!(matches!(
            parse_args(args(&[])),
            Err(RunnerError::MissingScenario { .. })
        ));
        assert!(matches!(
            parse_args(args(&["--scenario"])),
            Err(RunnerError::MissingArgumentValue {
                arg: "--scenario",
                ..
            })
        ));
        assert!(matches!(
            parse_args(args(&["--scenario=nope"])),
            Err(RunnerError::UnknownScenario { .. })
        ));
        assert!(matches!(
            parse_args(args(&["--verbose"])),
            Err(RunnerError::UnknownArgument { .. })
        ));
    }
}
