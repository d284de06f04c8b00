//! Scripted sessions for `codefold replay`.
//!
//! ```json
//! {
//!   "document": { "tag": "div", "class": "prose" },
//!   "steps": [
//!     { "op": "insert", "element": { "tag": "pre", "text": "a\nb\nc" } },
//!     { "op": "advance", "ms": 300 },
//!     { "op": "toggle", "index": 0 },
//!     { "op": "expect", "items": 1, "collapsed": 1 }
//!   ]
//! }
//! ```

use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use codefold::config::ConfigPatch;
use codefold::dom::{Document, Dom, ElementSpec, NodeId, Selector};
use codefold::engine::{EngineEvent, FoldState, KeyChord};
use codefold::platform::cli::Session;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    #[serde(default)]
    pub document: ElementSpec,
    #[serde(default)]
    pub rescan_delay_ms: Option<u64>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Step {
    /// Build `element` under the first match of `parent` (default `<body>`)
    /// and report it as one mutation batch.
    Insert {
        #[serde(default)]
        parent: Option<String>,
        element: ElementSpec,
    },
    Remove {
        selector: String,
    },
    Advance {
        ms: u64,
    },
    /// By identity, or by position among the tracked items.
    Toggle {
        #[serde(default)]
        identity: Option<String>,
        #[serde(default)]
        index: Option<usize>,
    },
    Key {
        chord: String,
        #[serde(default)]
        focus: Option<String>,
    },
    Click {
        selector: String,
    },
    Apply {
        settings: ConfigPatch,
    },
    CollapseAll,
    ExpandAll,
    Expect {
        #[serde(default)]
        items: Option<usize>,
        #[serde(default)]
        collapsed: Option<usize>,
        #[serde(default)]
        rescans: Option<u64>,
    },
}

/// How `advance` passes time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pace {
    /// Jump the virtual clock.
    Virtual,
    /// Sleep for real, delivering each timer when it is due.
    Realtime,
}

pub async fn run(session: &mut Session<Document>, steps: &[Step], pace: Pace) -> Result<()> {
    for (number, step) in steps.iter().enumerate() {
        run_step(session, step, pace)
            .await
            .with_context(|| format!("step {} ({step:?})", number + 1))?;
    }
    Ok(())
}

async fn run_step(session: &mut Session<Document>, step: &Step, pace: Pace) -> Result<()> {
    match step {
        Step::Insert { parent, element } => {
            let parent = match parent {
                Some(selector) => select(session, selector)?,
                None => session.engine().dom().body(),
            };
            session.insert(parent, element);
        }
        Step::Remove { selector } => {
            let node = select(session, selector)?;
            session.engine_mut().dom_mut().remove(&node);
        }
        Step::Advance { ms } => advance(session, *ms, pace).await,
        Step::Toggle { identity, index } => {
            let identity = match (identity, index) {
                (Some(identity), _) => identity.clone(),
                (None, Some(index)) => session
                    .engine()
                    .items()
                    .nth(*index)
                    .map(|item| item.identity.clone())
                    .with_context(|| format!("no item at index {index}"))?,
                (None, None) => bail!("toggle needs an identity or an index"),
            };
            session.dispatch(EngineEvent::Toggle(identity));
        }
        Step::Key { chord, focus } => {
            let chord: KeyChord = chord.parse().map_err(anyhow::Error::msg)?;
            let focused = match focus {
                Some(selector) => Some(select(session, selector)?),
                None => None,
            };
            session.dispatch(EngineEvent::Key { chord, focused });
        }
        Step::Click { selector } => {
            let node = select(session, selector)?;
            session.dispatch(EngineEvent::Click(node));
        }
        Step::Apply { settings } => session.dispatch(EngineEvent::ApplySettings(settings.clone())),
        Step::CollapseAll => session.dispatch(EngineEvent::CollapseAll),
        Step::ExpandAll => session.dispatch(EngineEvent::ExpandAll),
        Step::Expect {
            items,
            collapsed,
            rescans,
        } => {
            let engine = session.engine();
            if let Some(expected) = items {
                let actual = engine.items().count();
                ensure!(actual == *expected, "expected {expected} items, found {actual}");
            }
            if let Some(expected) = collapsed {
                let actual = engine
                    .items()
                    .filter(|item| item.state == FoldState::Collapsed)
                    .count();
                ensure!(
                    actual == *expected,
                    "expected {expected} collapsed items, found {actual}"
                );
            }
            if let Some(expected) = rescans {
                let actual = engine.stats().rescans;
                ensure!(actual == *expected, "expected {expected} re-scans, found {actual}");
            }
        }
    }
    Ok(())
}

async fn advance(session: &mut Session<Document>, ms: u64, pace: Pace) {
    match pace {
        Pace::Virtual => {
            session.advance_by(ms);
        }
        Pace::Realtime => {
            let mut remaining = ms;
            while let Some(wait) = session.time_to_next_timer().filter(|wait| *wait <= remaining) {
                tokio::time::sleep(Duration::from_millis(wait)).await;
                session.advance_by(wait);
                remaining -= wait;
            }
            tokio::time::sleep(Duration::from_millis(remaining)).await;
            session.advance_by(remaining);
        }
    }
    info!(now_ms = session.now_ms(), "advanced");
}

fn select(session: &Session<Document>, source: &str) -> Result<NodeId> {
    let selector = Selector::parse(source).with_context(|| format!("selector '{source}'"))?;
    let dom = session.engine().dom();
    selector
        .select_first(dom, &dom.body())
        .with_context(|| format!("nothing matches '{source}'"))
}
