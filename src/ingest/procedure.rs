/// Retrieval procedure: fill in the portal's query form and request the CSV
/// export.
///
/// The procedure is a fixed sequence of named steps. Every step runs even if
/// an earlier one failed, and within a step a control that never shows up
/// only costs that one item: partial selection is an accepted outcome and the
/// run continues with whatever was actually ticked. Nothing in here returns
/// an error to the caller; the `RetrievalReport` says what happened.
///
/// The tree widgets (regions → stations, indicator group → indicators) are
/// modelled per group as `GroupState`. A leaf checkbox is only clicked while
/// its group is known to be `Expanded`, and a group toggle is only clicked
/// while the group is `Collapsed`, which keeps expansion idempotent.

use std::collections::BTreeMap;
use std::fmt;
use std::thread;
use std::time::Duration;

use crate::browser::locator::FieldLocator;
use crate::browser::{Element, Page, Target};
use crate::config::{PageConfig, WaitConfig};
use crate::logging::{self, Stage};
use crate::model::{PipelineError, TargetWindow};
use crate::stations::SelectionSet;

// ---------------------------------------------------------------------------
// Step bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepName {
    OpenPortal,
    SetWindow,
    ExpandRegions,
    SelectStations,
    SelectIndicators,
    SubmitAndExport,
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepName::OpenPortal => write!(f, "open portal"),
            StepName::SetWindow => write!(f, "set date window"),
            StepName::ExpandRegions => write!(f, "expand regions"),
            StepName::SelectStations => write!(f, "select stations"),
            StepName::SelectIndicators => write!(f, "select indicators"),
            StepName::SubmitAndExport => write!(f, "submit and export"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// Some named items could not be processed.
    Partial { missed: Vec<String> },
    Failed(String),
}

impl StepOutcome {
    fn from_missed(missed: Vec<String>, attempted: usize) -> Self {
        if missed.is_empty() {
            StepOutcome::Done
        } else if missed.len() == attempted {
            StepOutcome::Failed(format!("none of {} item(s) processed", attempted))
        } else {
            StepOutcome::Partial { missed }
        }
    }
}

/// Expand/collapse state of one tree group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Collapsed,
    Expanded,
    /// The toggle never became interactable.
    Unavailable,
}

impl GroupState {
    /// Reads the state off a toggle's `class` attribute.
    pub fn from_class(class: Option<&str>, collapsed_marker: &str) -> Self {
        match class {
            Some(c) if c.contains(collapsed_marker) => GroupState::Collapsed,
            _ => GroupState::Expanded,
        }
    }
}

/// What the retrieval procedure managed to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalReport {
    pub steps: Vec<(StepName, StepOutcome)>,
    pub groups: BTreeMap<String, GroupState>,
    pub selected_stations: Vec<String>,
    pub selected_indicators: Vec<String>,
    /// The export link was clicked. The file may still not arrive.
    pub export_requested: bool,
}

impl RetrievalReport {
    pub fn outcome(&self, step: StepName) -> Option<&StepOutcome> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, o)| o)
    }

    fn record(&mut self, step: StepName, outcome: StepOutcome) {
        match &outcome {
            StepOutcome::Done => logging::info(Stage::Web, None, &format!("✓ {}", step)),
            StepOutcome::Partial { missed } => logging::warn(
                Stage::Web,
                None,
                &format!("{} finished without: {}", step, missed.join(", ")),
            ),
            StepOutcome::Failed(reason) => {
                logging::warn(Stage::Web, None, &format!("{} failed: {}", step, reason))
            }
        }
        self.steps.push((step, outcome));
    }
}

// ---------------------------------------------------------------------------
// Procedure
// ---------------------------------------------------------------------------

pub struct RetrievalProcedure {
    locator: FieldLocator,
    page: PageConfig,
    waits: WaitConfig,
}

fn settle(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

impl RetrievalProcedure {
    pub fn new(page: PageConfig, waits: WaitConfig) -> Self {
        Self {
            locator: FieldLocator::new(waits.locate_timeout(), waits.poll_interval()),
            page,
            waits,
        }
    }

    /// Runs every step against `page` and reports the outcome of each.
    pub fn run(
        &self,
        page: &mut dyn Page,
        url: &str,
        window: &TargetWindow,
        selection: &SelectionSet,
    ) -> RetrievalReport {
        let mut report = RetrievalReport::default();

        let opened = match page.navigate(url) {
            Ok(()) => StepOutcome::Done,
            Err(e) => StepOutcome::Failed(e.to_string()),
        };
        report.record(StepName::OpenPortal, opened);

        let outcome = self.set_window(page, window);
        report.record(StepName::SetWindow, outcome);

        let outcome = self.expand_regions(page, &selection.regions, &mut report.groups);
        report.record(StepName::ExpandRegions, outcome);

        let outcome = self.select_stations(page, selection, &mut report);
        report.record(StepName::SelectStations, outcome);

        let outcome = self.select_indicators(page, selection, &mut report);
        report.record(StepName::SelectIndicators, outcome);

        let outcome = self.submit_and_export(page, &mut report);
        report.record(StepName::SubmitAndExport, outcome);

        report
    }

    fn locate(&self, page: &mut dyn Page, target: &Target) -> Result<Element, PipelineError> {
        self.locator
            .wait_for(page, target)
            .ok_or_else(|| PipelineError::ControlNotFound(target.to_string()))
    }

    // --- Step 1 ------------------------------------------------------------

    fn set_window(&self, page: &mut dyn Page, window: &TargetWindow) -> StepOutcome {
        logging::info(
            Stage::Web,
            None,
            &format!("Setting window {} ~ {}", window.start_value(), window.end_value()),
        );

        let inputs = [
            (&self.page.start_date_id, window.start_value()),
            (&self.page.end_date_id, window.end_value()),
        ];
        let attempted = inputs.len();
        let mut missed = Vec::new();
        for (id, value) in inputs {
            let result = self
                .locate(page, &Target::Id(id.clone()))
                .and_then(|input| {
                    page.clear(&input)
                        .and_then(|_| page.type_text(&input, &value))
                        .map_err(|e| PipelineError::ControlNotFound(e.to_string()))
                });
            if let Err(e) = result {
                logging::warn(Stage::Web, Some(id.as_str()), &format!("date input not set: {}", e));
                missed.push(id.clone());
            }
        }
        settle(self.waits.date_settle());
        StepOutcome::from_missed(missed, attempted)
    }

    // --- Steps 2 and 4a: group expansion -------------------------------------

    /// Brings one group to `Expanded` if it can. Already-expanded groups are
    /// left untouched.
    fn expand_group(
        &self,
        page: &mut dyn Page,
        label: &str,
        groups: &mut BTreeMap<String, GroupState>,
    ) -> GroupState {
        if groups.get(label) == Some(&GroupState::Expanded) {
            return GroupState::Expanded;
        }

        let Ok(toggle) = self.locate(page, &Target::GroupToggle(label.to_string())) else {
            logging::warn(Stage::Web, Some(label), "group could not be expanded");
            groups.insert(label.to_string(), GroupState::Unavailable);
            return GroupState::Unavailable;
        };

        let class = page.attribute(&toggle, "class").unwrap_or_else(|e| {
            logging::debug(Stage::Web, Some(label), &format!("class unreadable: {}", e));
            None
        });
        let mut state = GroupState::from_class(class.as_deref(), &self.page.collapsed_marker);

        if state == GroupState::Collapsed {
            match page.click(&toggle) {
                Ok(()) => {
                    settle(self.waits.expand_settle());
                    state = GroupState::Expanded;
                }
                Err(e) => {
                    logging::warn(Stage::Web, Some(label), &format!("toggle click failed: {}", e))
                }
            }
        }

        groups.insert(label.to_string(), state);
        state
    }

    fn expand_regions(
        &self,
        page: &mut dyn Page,
        regions: &[String],
        groups: &mut BTreeMap<String, GroupState>,
    ) -> StepOutcome {
        logging::info(Stage::Web, None, "Expanding region groups...");
        let missed: Vec<String> = regions
            .iter()
            .filter(|region| self.expand_group(page, region, groups) != GroupState::Expanded)
            .cloned()
            .collect();
        StepOutcome::from_missed(missed, regions.len())
    }

    // --- Steps 3 and 4b: leaf selection --------------------------------------

    fn select_leaf(&self, page: &mut dyn Page, label: &str) -> bool {
        let clicked = self
            .locate(page, &Target::LeafCheckbox(label.to_string()))
            .and_then(|checkbox| {
                page.script_click(&checkbox)
                    .map_err(|e| PipelineError::ControlNotFound(e.to_string()))
            });
        match clicked {
            Ok(()) => {
                settle(self.waits.select_settle());
                true
            }
            Err(e) => {
                logging::warn(Stage::Web, Some(label), &format!("could not be selected: {}", e));
                false
            }
        }
    }

    fn select_stations(
        &self,
        page: &mut dyn Page,
        selection: &SelectionSet,
        report: &mut RetrievalReport,
    ) -> StepOutcome {
        logging::info(Stage::Web, None, "Selecting stations...");
        let mut missed = Vec::new();
        for station in &selection.stations {
            let region_open = selection.regions.contains(&station.region)
                && report.groups.get(&station.region) == Some(&GroupState::Expanded);
            if !region_open {
                logging::warn(
                    Stage::Web,
                    Some(station.label.as_str()),
                    &format!("skipped: region '{}' is not expanded", station.region),
                );
                missed.push(station.label.clone());
                continue;
            }
            if self.select_leaf(page, &station.label) {
                report.selected_stations.push(station.label.clone());
            } else {
                missed.push(station.label.clone());
            }
        }
        StepOutcome::from_missed(missed, selection.stations.len())
    }

    fn select_indicators(
        &self,
        page: &mut dyn Page,
        selection: &SelectionSet,
        report: &mut RetrievalReport,
    ) -> StepOutcome {
        logging::info(Stage::Web, None, "Selecting indicators...");
        let group = &selection.indicator_group;
        if self.expand_group(page, group, &mut report.groups) != GroupState::Expanded {
            return StepOutcome::Failed(format!("indicator group '{}' not expanded", group));
        }

        let mut missed = Vec::new();
        for indicator in &selection.indicators {
            if self.select_leaf(page, indicator) {
                report.selected_indicators.push(indicator.clone());
            } else {
                missed.push(indicator.clone());
            }
        }
        StepOutcome::from_missed(missed, selection.indicators.len())
    }

    // --- Step 5 --------------------------------------------------------------

    fn click_target(&self, page: &mut dyn Page, target: &Target) -> Result<(), PipelineError> {
        let element = self.locate(page, target)?;
        page.click(&element)
            .map_err(|e| PipelineError::ControlNotFound(format!("{}: {}", target, e)))
    }

    fn submit_and_export(&self, page: &mut dyn Page, report: &mut RetrievalReport) -> StepOutcome {
        logging::info(Stage::Web, None, "Submitting query and requesting export...");
        let mut missed = Vec::new();

        let submit = Target::Button(self.page.submit_text.clone());
        match self.click_target(page, &submit) {
            Ok(()) => settle(self.waits.results_settle()),
            Err(e) => {
                logging::warn(Stage::Web, None, &e.to_string());
                missed.push(submit.to_string());
            }
        }

        let export = Target::Link {
            class: self.page.export_class.clone(),
            text: self.page.export_text.clone(),
        };
        match self.click_target(page, &export) {
            Ok(()) => report.export_requested = true,
            Err(e) => {
                logging::warn(Stage::Web, None, &e.to_string());
                missed.push(export.to_string());
            }
        }

        let confirm = Target::DialogLink {
            dialog_id: self.page.confirm_dialog_id.clone(),
            class: self.page.confirm_class.clone(),
            text: self.page.confirm_text.clone(),
        };
        if let Err(e) = self.click_target(page, &confirm) {
            logging::warn(Stage::Web, None, &e.to_string());
            missed.push(confirm.to_string());
        }

        StepOutcome::from_missed(missed, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_state_from_toggle_class() {
        assert_eq!(
            GroupState::from_class(Some("button level0 switch roots_close"), "close"),
            GroupState::Collapsed
        );
        assert_eq!(
            GroupState::from_class(Some("button level0 switch roots_open"), "close"),
            GroupState::Expanded
        );
        assert_eq!(GroupState::from_class(None, "close"), GroupState::Expanded);
    }

    #[test]
    fn test_step_outcome_from_missed() {
        assert_eq!(StepOutcome::from_missed(vec![], 4), StepOutcome::Done);
        assert_eq!(
            StepOutcome::from_missed(vec!["a".into()], 4),
            StepOutcome::Partial { missed: vec!["a".into()] }
        );
        assert!(matches!(
            StepOutcome::from_missed(vec!["a".into(), "b".into()], 2),
            StepOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_step_names_read_as_narration() {
        assert_eq!(StepName::SubmitAndExport.to_string(), "submit and export");
    }
}
