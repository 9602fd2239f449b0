//! Lifecycle of one run group: one backend run over every test case.

use std::sync::Arc;

use evalrun_reporting::RunId;

use crate::error::{EngineError, EngineResult};
use crate::grid::GridCombo;
use crate::obs;
use crate::reporter::Reporter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunGroupState {
    Created,
    Started(RunId),
    Ended(RunId),
}

/// A run group moves `Created -> Started -> Ended` and never back.
///
/// 1. [`RunGroup::start`] opens the backend run and binds its id.
/// 2. Test cases report against [`RunGroup::run_id`].
/// 3. [`RunGroup::end`] closes the run; a second call fails.
pub struct RunGroup {
    reporter: Arc<Reporter>,
    combo: GridCombo,
    grid_search_run_group_id: Option<String>,
    state: RunGroupState,
}

impl RunGroup {
    pub fn new(
        reporter: Arc<Reporter>,
        combo: GridCombo,
        grid_search_run_group_id: Option<String>,
    ) -> Self {
        Self {
            reporter,
            combo,
            grid_search_run_group_id,
            state: RunGroupState::Created,
        }
    }

    pub fn state(&self) -> &RunGroupState {
        &self.state
    }

    pub fn combo(&self) -> &GridCombo {
        &self.combo
    }

    /// Id of the backend run, while the group is started.
    pub fn run_id(&self) -> EngineResult<&RunId> {
        match &self.state {
            RunGroupState::Started(run_id) => Ok(run_id),
            RunGroupState::Created => Err(EngineError::RunNotStarted),
            RunGroupState::Ended(run_id) => Err(EngineError::RunEnded {
                run_id: run_id.to_string(),
            }),
        }
    }

    pub async fn start(&mut self) -> EngineResult<RunId> {
        match &self.state {
            RunGroupState::Created => {}
            RunGroupState::Started(run_id) => {
                return Err(EngineError::RunAlreadyStarted {
                    run_id: run_id.to_string(),
                })
            }
            RunGroupState::Ended(run_id) => {
                return Err(EngineError::RunEnded {
                    run_id: run_id.to_string(),
                })
            }
        }

        let run_id = self
            .reporter
            .start(self.grid_search_run_group_id.clone(), &self.combo)
            .await?;
        obs::emit_run_group_started(
            self.reporter.test_id(),
            &run_id.to_string(),
            &format!("{:?}", self.combo.to_map()),
        );
        self.state = RunGroupState::Started(run_id.clone());
        Ok(run_id)
    }

    /// Close the backend run.
    ///
    /// The group counts as ended even if the backend call fails; that
    /// failure is logged and swallowed.
    pub async fn end(&mut self) -> EngineResult<()> {
        let run_id = self.run_id()?.clone();
        if let Err(e) = self.reporter.end(&run_id).await {
            obs::emit_report_dropped("end", &e);
        }
        self.state = RunGroupState::Ended(run_id);
        Ok(())
    }
}
