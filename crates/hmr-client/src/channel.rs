//! Push channel handling.
//!
//! `hash` events replace the latest known hash; `ready` events request an
//! update attempt. The outcome of each attempt is turned into a
//! [`ClientNotice`] according to the configured [`FallbackPolicy`].

use std::sync::Arc;

use clap::ValueEnum;
use futures::{Sink, SinkExt, Stream, StreamExt};
use hmr_protocol::{BuildHash, ModuleId, ServerEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::applier::ApplyReport;
use crate::checker::{UpdateChecker, UpdateOutcome};
use crate::error::{HmrError, HmrResult};
use crate::state::ConnectionState;

/// What to do when an applied update was not contained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Ask the embedding application to reload.
    #[default]
    Reload,
    /// Keep running on the patched registry.
    Ignore,
}

/// Update outcomes as seen by the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientNotice {
    /// The first announced hash was adopted without fetching anything.
    Baseline { hash: BuildHash },
    /// An update was applied.
    Updated {
        from: BuildHash,
        to: BuildHash,
        report: ApplyReport,
    },
    /// An update was applied but not contained; the page should reload.
    ReloadRequired {
        hash: BuildHash,
        modules: Vec<ModuleId>,
    },
    /// The attempt aborted; the next `ready` retries it.
    UpdateFailed { error: String },
}

impl ClientNotice {
    fn from_outcome(result: HmrResult<UpdateOutcome>, policy: FallbackPolicy) -> Option<Self> {
        match result {
            Ok(UpdateOutcome::Baseline(hash)) => hash.map(|hash| Self::Baseline { hash }),
            Ok(UpdateOutcome::UpToDate) => None,
            Ok(UpdateOutcome::Applied { from, to, report }) => {
                if !report.is_contained() && policy == FallbackPolicy::Reload {
                    Some(Self::ReloadRequired {
                        hash: to,
                        modules: report.escalated(),
                    })
                } else {
                    Some(Self::Updated { from, to, report })
                }
            }
            Err(err) => Some(Self::UpdateFailed {
                error: err.to_string(),
            }),
        }
    }
}

pub struct ClientChannel {
    state: Arc<ConnectionState>,
    checker: Arc<UpdateChecker>,
    policy: FallbackPolicy,
    notices: Option<mpsc::UnboundedSender<ClientNotice>>,
}

impl ClientChannel {
    pub fn new(checker: Arc<UpdateChecker>, policy: FallbackPolicy) -> Self {
        Self {
            state: Arc::clone(checker.state()),
            checker,
            policy,
            notices: None,
        }
    }

    /// Deliver notices to `tx`.
    pub fn with_notices(mut self, tx: mpsc::UnboundedSender<ClientNotice>) -> Self {
        self.notices = Some(tx);
        self
    }

    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    pub async fn on_hash(&self, hash: BuildHash) {
        debug!("Server hash {}", hash);
        self.state.record_hash(hash).await;
    }

    /// Request an update attempt. Returns false when the request was folded
    /// into an attempt that is already queued.
    pub fn on_ready(&self) -> bool {
        let policy = self.policy;
        let notices = self.notices.clone();
        self.checker.request_update_with(move |result| {
            if let Err(err) = &result {
                warn!("Update attempt failed: {}", err);
            }
            let Some(notice) = ClientNotice::from_outcome(result, policy) else {
                return;
            };
            if let ClientNotice::ReloadRequired { hash, modules } = &notice {
                warn!(
                    "Update to {} was not contained ({} modules), reload required",
                    hash,
                    modules.len()
                );
            }
            if let Some(tx) = notices {
                let _ = tx.send(notice);
            }
        })
    }

    pub async fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::Hash { hash } => self.on_hash(hash).await,
            ServerEvent::Ready => {
                self.on_ready();
            }
        }
    }

    /// Handle one text frame. Frames that are not server events are logged
    /// and skipped.
    pub async fn handle_text(&self, text: &str) {
        match ServerEvent::from_json(text) {
            Ok(event) => self.handle_event(event).await,
            Err(err) => warn!("Ignoring unrecognized push frame: {}", err),
        }
    }

    /// Process frames from `socket` until it closes.
    pub async fn run<S>(&self, socket: S) -> HmrResult<()>
    where
        S: Stream<Item = Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Unpin,
    {
        let (mut sender, mut receiver) = socket.split();

        while let Some(msg) = receiver.next().await {
            match msg? {
                Message::Text(text) => self.handle_text(text.as_str()).await,
                Message::Ping(data) => sender.send(Message::Pong(data)).await?,
                Message::Close(frame) => {
                    info!("Push channel closed by server: {:?}", frame);
                    break;
                }
                Message::Binary(_) => warn!("Ignoring binary push frame"),
                Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(())
    }

    /// Connect to the push endpoint at `url` and process it until it closes.
    pub async fn connect(&self, url: &str) -> HmrResult<()> {
        let (socket, _) = connect_async(url).await.map_err(HmrError::from)?;
        info!("Connected to {}", url);
        self.run(socket).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::Acceptance;

    fn hash(value: &str) -> BuildHash {
        BuildHash::new(value).unwrap()
    }

    fn uncontained_report() -> ApplyReport {
        ApplyReport {
            updated: vec![ModuleId::from("./b.js")],
            uncontained: vec![ModuleId::from("./b.js")],
            ..Default::default()
        }
    }

    #[test]
    fn test_uncontained_update_requires_reload() {
        let outcome = UpdateOutcome::Applied {
            from: hash("h1"),
            to: hash("h2"),
            report: uncontained_report(),
        };
        let notice = ClientNotice::from_outcome(Ok(outcome), FallbackPolicy::Reload).unwrap();
        assert_eq!(
            notice,
            ClientNotice::ReloadRequired {
                hash: hash("h2"),
                modules: vec![ModuleId::from("./b.js")],
            }
        );
    }

    #[test]
    fn test_ignore_policy_reports_update() {
        let outcome = UpdateOutcome::Applied {
            from: hash("h1"),
            to: hash("h2"),
            report: uncontained_report(),
        };
        let notice = ClientNotice::from_outcome(Ok(outcome), FallbackPolicy::Ignore).unwrap();
        assert!(matches!(notice, ClientNotice::Updated { .. }));
    }

    #[test]
    fn test_contained_update_is_reported() {
        let report = ApplyReport {
            updated: vec![ModuleId::from("./b.js")],
            accepted: vec![Acceptance {
                acceptor: ModuleId::from("./a.js"),
                dependency: ModuleId::from("./b.js"),
                changed: ModuleId::from("./b.js"),
            }],
            ..Default::default()
        };
        let outcome = UpdateOutcome::Applied {
            from: hash("h1"),
            to: hash("h2"),
            report,
        };
        let notice = ClientNotice::from_outcome(Ok(outcome), FallbackPolicy::Reload).unwrap();
        assert!(matches!(notice, ClientNotice::Updated { .. }));
    }

    #[test]
    fn test_noops_produce_no_notice() {
        assert!(ClientNotice::from_outcome(Ok(UpdateOutcome::UpToDate), FallbackPolicy::Reload).is_none());
        assert!(
            ClientNotice::from_outcome(Ok(UpdateOutcome::Baseline(None)), FallbackPolicy::Reload)
                .is_none()
        );
    }

    #[test]
    fn test_failure_becomes_notice() {
        let err = HmrError::Status {
            url: "http://localhost/h1.hot-update.json".into(),
            status: 404,
        };
        let notice = ClientNotice::from_outcome(Err(err), FallbackPolicy::Reload).unwrap();
        assert!(matches!(notice, ClientNotice::UpdateFailed { .. }));
    }

    #[test]
    fn test_policy_parses_from_config_value() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: FallbackPolicy,
        }
        let parsed: Wrapper = toml::from_str("policy = \"ignore\"").unwrap();
        assert_eq!(parsed.policy, FallbackPolicy::Ignore);
    }

    #[test]
    fn test_policy_cli_names_match_config_names() {
        assert_eq!(
            FallbackPolicy::from_str("reload", false),
            Ok(FallbackPolicy::Reload)
        );
        assert_eq!(
            FallbackPolicy::from_str("ignore", false),
            Ok(FallbackPolicy::Ignore)
        );
        assert!(FallbackPolicy::from_str("restart", false).is_err());
    }
}
