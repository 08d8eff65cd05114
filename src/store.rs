use crate::errors::Result;
use crate::models::{State, StatePatch};

/// In-memory owner of the application state.
///
/// Every successful mutation bumps `sequence` and marks the store dirty until
/// the matching sequence has been written to durable storage.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    state: State,
    sequence: u64,
    saved_sequence: Option<u64>,
    display_period: Option<String>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store restored from durable storage; considered clean.
    pub fn restored(state: State, sequence: u64) -> Self {
        Self {
            state,
            sequence,
            saved_sequence: Some(sequence),
            display_period: None,
        }
    }

    pub fn get_state(&self) -> &State {
        &self.state
    }

    pub fn snapshot(&self) -> State {
        self.state.clone()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_dirty(&self) -> bool {
        self.saved_sequence != Some(self.sequence)
    }

    pub fn mark_saved(&mut self, sequence: u64) {
        self.saved_sequence = Some(sequence);
    }

    pub fn set_state(&mut self, patch: StatePatch) {
        let state = &mut self.state;
        if let Some(users) = patch.users {
            state.users = users;
        }
        if let Some(wgs) = patch.wgs {
            state.wgs = wgs;
        }
        if let Some(current_wg) = patch.current_wg {
            state.current_wg = current_wg;
        }
        if let Some(current_period) = patch.current_period {
            state.current_period = current_period;
        }
        if let Some(tasks) = patch.tasks {
            state.tasks = tasks;
        }
        if let Some(executions) = patch.executions {
            state.executions = executions;
        }
        if let Some(absences) = patch.absences {
            state.absences = absences;
        }
        if let Some(residents) = patch.temporary_residents {
            state.temporary_residents = residents;
        }
        if let Some(ratings) = patch.ratings {
            state.ratings = ratings;
        }
        self.bump();
    }

    /// Runs `mutate` against a draft. The draft replaces the state only on `Ok`,
    /// so a rejected operation leaves no partial change behind.
    pub fn update<T>(&mut self, mutate: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut draft = self.state.clone();
        let value = mutate(&mut draft)?;
        self.state = draft;
        self.bump();
        Ok(value)
    }

    /// Swaps in a state adopted from storage at `sequence`.
    pub fn replace(&mut self, state: State, sequence: u64) {
        self.state = state;
        self.sequence = self.sequence.max(sequence);
        self.saved_sequence = Some(self.sequence);
        self.retain_display_period();
    }

    pub fn clear_all_data(&mut self) {
        self.state = State::default();
        self.display_period = None;
        self.bump();
    }

    pub fn display_period(&self) -> Option<&str> {
        self.display_period.as_deref()
    }

    /// View-only pointer; not part of `State` and never persisted.
    pub fn set_display_period(&mut self, period_id: Option<String>) {
        self.display_period = period_id;
    }

    fn bump(&mut self) {
        self.sequence += 1;
        self.retain_display_period();
    }

    fn retain_display_period(&mut self) {
        let known = match (self.display_period.as_deref(), self.state.current_household()) {
            (Some(id), Some(household)) => household.contains_period(id),
            (Some(_), None) => false,
            (None, _) => true,
        };
        if !known {
            self.display_period = None;
        }
    }
}
