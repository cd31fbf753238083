//! Issue-and-wait on top of the ID-less reply protocol.
//!
//! Replies carry no correlation id. A reply is attributed to a command only
//! because the slot was cleared right before the command went out and the
//! reply carries the expected marker field. The first reply decides: one
//! without the marker ends the wait with no data. The issue lock keeps concurrent
//! callers of one connector from interleaving those steps; a reply that
//! arrives late for an earlier, timed-out command can still be taken for the
//! current one.

use crate::connector::Connector;
use crate::error::Result;
use bridge::{Command, OpenTrade, Response, ResponseMarker, TradeAction, TradeInstruction};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// How long to wait for a reply: `max_retries` checks, `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_retries: 10,
        }
    }
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries,
        }
    }

    /// Total time spent waiting before giving up.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_retries
    }
}

/// The marker that identifies the reply to an instruction with `action`.
pub fn marker_for(action: TradeAction) -> ResponseMarker {
    if action.is_close() {
        ResponseMarker::ResponseValue
    } else {
        ResponseMarker::Action
    }
}

/// Sends commands through a [`Connector`] and waits for their replies.
pub struct Executor<'a> {
    connector: &'a Connector,
    policy: RetryPolicy,
}

impl<'a> Executor<'a> {
    pub fn new(connector: &'a Connector) -> Self {
        Self {
            connector,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Clears the slot, sends `command` and waits for a reply carrying `marker`.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(Response))` when the first reply carries `marker`.
    /// * `Ok(None)` when the first reply lacks `marker`, nothing arrived within
    ///   the retry budget, or the command was dropped by a full queue.
    /// * `Err` when the command could not be sent at all.
    pub fn issue(&self, command: &Command, marker: ResponseMarker) -> Result<Option<Response>> {
        let _guard = self.connector.issue_guard();
        let slot = self.connector.response_slot();

        slot.clear();
        if !self.connector.send_command(command)?.is_sent() {
            return Ok(None);
        }

        for attempt in 1..=self.policy.max_retries {
            match slot.wait_for(self.policy.interval) {
                Some(response) if response.has_marker(marker) => {
                    debug!(
                        "[EXEC] {} answered after {} check(s)",
                        command.kind(),
                        attempt
                    );
                    return Ok(Some(response));
                }
                Some(response) => {
                    warn!(
                        "[EXEC] Reply to {} lacks {}, discarded: {:?}",
                        command.kind(),
                        marker.field_name(),
                        response.action()
                    );
                    return Ok(None);
                }
                None => {}
            }
        }

        warn!(
            "[EXEC] No {} reply to {} within {:?}",
            marker.field_name(),
            command.kind(),
            self.policy.budget()
        );
        Ok(None)
    }

    /// Sends a TRADE instruction and waits for its execution or close report.
    pub fn execute(&self, instruction: TradeInstruction) -> Result<Option<Response>> {
        let marker = marker_for(instruction.action);
        info!(
            "[EXEC] {} {} {} lots (ticket {})",
            instruction.action, instruction.symbol, instruction.lots, instruction.ticket
        );
        self.issue(&Command::Trade(instruction), marker)
    }

    /// Open trades whose comment is `trader`, keyed by ticket.
    ///
    /// Empty when no OPEN_TRADES reply arrived in time.
    pub fn open_trades(&self, trader: &str) -> Result<BTreeMap<String, OpenTrade>> {
        let instruction = self.connector.default_instruction(TradeAction::GetOpenTrades);
        let reply = self.issue(&Command::Trade(instruction), ResponseMarker::Action)?;

        match reply {
            Some(Response::OpenTrades(report)) => Ok(report
                .by_comment(trader)
                .map(|(ticket, trade)| (ticket.clone(), trade.clone()))
                .collect()),
            Some(other) => {
                warn!("[EXEC] Expected OPEN_TRADES, got {:?}", other.action());
                Ok(BTreeMap::new())
            }
            None => Ok(BTreeMap::new()),
        }
    }
}
