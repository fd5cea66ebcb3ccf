//! Mock SCPI adapter for testing
//!
//! Simulates an instrument connection without hardware. It provides:
//! - Scripted responses, either queued (consumed once) or fixed
//! - Register echo: after `"SENS:VOLT:RANG:AUTO ON"` is written, the query
//!   `"SENS:VOLT:RANG:AUTO?"` answers `"ON"`
//! - Controllable failure injection
//! - Call logging for test verification

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::ScpiAdapter;

#[derive(Default)]
struct MockState {
    queued: HashMap<String, VecDeque<String>>,
    fixed: HashMap<String, String>,
    registers: HashMap<String, String>,
    call_log: Vec<String>,
    fail_next: bool,
    latency: Duration,
}

/// Mock SCPI adapter
///
/// Clones share state, so a test can keep one handle for scripting and
/// inspection while a driver owns another.
///
/// # Example
///
/// ```
/// use probe_station::adapters::MockAdapter;
///
/// let adapter = MockAdapter::new();
/// adapter.push_response("FETC?", "0.0301,0.000142");
/// assert!(adapter.call_log().is_empty());
/// ```
#[derive(Clone, Default)]
pub struct MockAdapter {
    state: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    /// Create a new mock adapter with no scripted responses
    pub fn new() -> Self {
        Self::default()
    }

    /// Set simulated latency applied to every call
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    /// Queue a response for `query`; queued responses are consumed in order
    pub fn push_response(&self, query: &str, response: &str) {
        self.lock()
            .queued
            .entry(query.to_string())
            .or_default()
            .push_back(response.to_string());
    }

    /// Answer `query` with `response` every time (after any queued responses run out)
    pub fn set_response(&self, query: &str, response: &str) {
        self.lock()
            .fixed
            .insert(query.to_string(), response.to_string());
    }

    /// Inject a failure for the next operation
    pub fn inject_next_failure(&self) {
        self.lock().fail_next = true;
    }

    /// Every command written or queried, in order
    pub fn call_log(&self) -> Vec<String> {
        self.lock().call_log.clone()
    }

    /// Commands only (queries filtered out)
    pub fn writes(&self) -> Vec<String> {
        self.lock()
            .call_log
            .iter()
            .filter(|c| !is_query(c))
            .cloned()
            .collect()
    }

    /// Clear the call log
    pub fn clear_log(&self) {
        self.lock().call_log.clear();
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn simulate_latency(&self) {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

fn is_query(command: &str) -> bool {
    command
        .split_whitespace()
        .next()
        .is_some_and(|header| header.ends_with('?'))
}

/// Split `"SENS:VOLT:NPLC 1"` into `("SENS:VOLT:NPLC", "1")`.
fn split_setting(command: &str) -> Option<(&str, &str)> {
    let (header, value) = command.trim().split_once(char::is_whitespace)?;
    Some((header, value.trim()))
}

#[async_trait]
impl ScpiAdapter for MockAdapter {
    async fn write(&self, command: &str) -> Result<()> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.call_log.push(command.to_string());

        if std::mem::take(&mut state.fail_next) {
            return Err(anyhow!("Injected failure writing '{}'", command));
        }

        if let Some((header, value)) = split_setting(command) {
            state
                .registers
                .insert(header.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn ask(&self, command: &str) -> Result<String> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.call_log.push(command.to_string());

        if std::mem::take(&mut state.fail_next) {
            return Err(anyhow!("Injected failure querying '{}'", command));
        }

        if let Some(response) = state.queued.get_mut(command).and_then(VecDeque::pop_front) {
            return Ok(response);
        }
        if let Some(response) = state.fixed.get(command) {
            return Ok(response.clone());
        }
        let register = command.trim().trim_end_matches('?');
        state
            .registers
            .get(register)
            .cloned()
            .ok_or_else(|| anyhow!("No mock response scripted for '{}'", command))
    }

    fn info(&self) -> String {
        "MockAdapter".to_string()
    }
}
