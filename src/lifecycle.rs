//! Worker lifecycle: installing → waiting → activating → active.

use color_eyre::{eyre::eyre, Result};
use tracing::debug;

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Precaching core assets
  Installing,
  /// Installed, but a previous worker still controls open pages
  Waiting,
  /// Cleaning up superseded stores
  Activating,
  /// Handling requests
  Active,
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::Installing => "installing",
      Self::Waiting => "waiting",
      Self::Activating => "activating",
      Self::Active => "active",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
  state: WorkerState,
  skip_waiting: bool,
  clients_claimed: bool,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self {
      state: WorkerState::Installing,
      skip_waiting: false,
      clients_claimed: false,
    }
  }
}

impl Lifecycle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn is_waiting(&self) -> bool {
    self.state == WorkerState::Waiting
  }

  pub fn is_active(&self) -> bool {
    self.state == WorkerState::Active
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting
  }

  pub fn clients_claimed(&self) -> bool {
    self.clients_claimed
  }

  /// Ask to leave the waiting phase without waiting for old pages to close.
  /// Has effect in any state; it is consulted once the worker is waiting.
  pub fn skip_waiting(&mut self) {
    self.skip_waiting = true;
  }

  /// Whether a waiting worker may activate now, given how many pages are
  /// still controlled by the previous worker.
  pub fn can_activate(&self, open_clients: usize) -> bool {
    self.is_waiting() && (self.skip_waiting || open_clients == 0)
  }

  pub fn installed(&mut self) -> Result<()> {
    self.transition(WorkerState::Installing, WorkerState::Waiting)
  }

  pub fn begin_activation(&mut self) -> Result<()> {
    self.transition(WorkerState::Waiting, WorkerState::Activating)
  }

  pub fn activated(&mut self) -> Result<()> {
    self.transition(WorkerState::Activating, WorkerState::Active)
  }

  /// Take control of pages that loaded before this worker activated.
  pub fn claim_clients(&mut self) -> Result<()> {
    if !matches!(self.state, WorkerState::Activating | WorkerState::Active) {
      return Err(eyre!("Cannot claim clients while {}", self.state));
    }
    self.clients_claimed = true;
    Ok(())
  }

  fn transition(&mut self, from: WorkerState, to: WorkerState) -> Result<()> {
    if self.state != from {
      return Err(eyre!("Cannot move to {} while {}", to, self.state));
    }
    debug!(%from, %to, "worker state");
    self.state = to;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_happy_path() {
    let mut lifecycle = Lifecycle::new();
    assert_eq!(lifecycle.state(), WorkerState::Installing);

    lifecycle.installed().unwrap();
    assert!(lifecycle.is_waiting());
    assert!(lifecycle.can_activate(0));

    lifecycle.begin_activation().unwrap();
    lifecycle.claim_clients().unwrap();
    lifecycle.activated().unwrap();
    assert!(lifecycle.is_active());
    assert!(lifecycle.clients_claimed());
  }

  #[test]
  fn test_open_clients_hold_worker_in_waiting() {
    let mut lifecycle = Lifecycle::new();
    lifecycle.installed().unwrap();
    assert!(!lifecycle.can_activate(2));

    lifecycle.skip_waiting();
    assert!(lifecycle.can_activate(2));
  }

  #[test]
  fn test_skip_waiting_before_install_is_remembered() {
    let mut lifecycle = Lifecycle::new();
    lifecycle.skip_waiting();
    assert!(!lifecycle.can_activate(1));
    lifecycle.installed().unwrap();
    assert!(lifecycle.can_activate(1));
  }

  #[test]
  fn test_invalid_transitions() {
    let mut lifecycle = Lifecycle::new();
    assert!(lifecycle.begin_activation().is_err());
    assert!(lifecycle.claim_clients().is_err());
    assert!(lifecycle.activated().is_err());

    lifecycle.installed().unwrap();
    assert!(lifecycle.installed().is_err());
  }
}
