// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scenario playback on a manual clock.

use crate::error::CliError;
use crate::scenario::{Scenario, Step};
use ordoplay_timing::{
    Converter, LoopbackProvider, ManualClock, Scheduler, TimingEvent, TimingEventKind,
    TimingObject, TimingSource,
};
use ordoplay_timing_sequencer::{Axis, CueChange, Sequencer, SequencerEvent, SequencerEventKind};
use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// One observed event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    /// Clock time of the event
    pub time: f64,
    /// Emitting component: `timing`, `view`, `cue` or `script`
    pub origin: &'static str,
    /// What happened
    pub event: String,
    /// Attached data, for cue events
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>9.3}  {:<6} {}", self.time, self.origin, self.event)?;
        if !self.data.is_null() {
            write!(f, " {}", self.data)?;
        }
        Ok(())
    }
}

/// Result of a run
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Events in the order they were observed
    pub entries: Vec<Entry>,
    /// Keys of the cues active when the run stopped
    pub active: Vec<String>,
    /// Position at the end of the converter chain when the run stopped
    pub position: f64,
}

#[derive(Clone)]
struct Journal {
    scheduler: Scheduler,
    entries: Rc<RefCell<Vec<Entry>>>,
}

impl Journal {
    fn record(&self, origin: &'static str, event: String, data: serde_json::Value) {
        let entry = Entry {
            time: self.scheduler.now(),
            origin,
            event,
            data,
        };
        tracing::info!("{entry}");
        self.entries.borrow_mut().push(entry);
    }

    fn watch(&self, source: &dyn TimingSource, origin: &'static str) {
        let journal = self.clone();
        source.on(
            TimingEventKind::Change,
            Box::new(move |event: &TimingEvent| {
                if let TimingEvent::Change(info) = event {
                    journal.record(origin, format!("change {}", info.vector), serde_json::Value::Null);
                }
            }),
        );
    }

    fn cue(&self, change: &CueChange) {
        let (label, cue) = match (&change.old, &change.new) {
            (Some(old), None) => ("exit", old),
            (None, Some(new)) => ("enter", new),
            (Some(_), Some(new)) => ("replace", new),
            (None, None) => return,
        };
        self.record("cue", format!("{label} {cue}"), cue.data.clone());
    }
}

/// Play `scenario` until `until` (or the scenario's own horizon)
pub fn run(scenario: &Scenario, until: Option<f64>) -> Result<Report, CliError> {
    let scheduler = Scheduler::manual(ManualClock::new(0.0));
    let journal = Journal {
        scheduler: scheduler.clone(),
        entries: Rc::new(RefCell::new(Vec::new())),
    };

    let provider = LoopbackProvider::new(
        scheduler.clone(),
        scenario.initial,
        scenario.range,
        scenario.loopback,
    );
    let timing = TimingObject::with_config(Rc::new(provider), scheduler.clone(), scenario.config);
    journal.watch(&timing, "timing");

    let mut view: Rc<dyn TimingSource> = Rc::new(timing.clone());
    for kind in &scenario.converters {
        view = Rc::new(Converter::new(Rc::clone(&view), *kind)?);
        tracing::debug!(converter = %kind, "converter stacked");
    }
    if !scenario.converters.is_empty() {
        journal.watch(view.as_ref(), "view");
    }

    let axis = Axis::new();
    axis.add_cues(scenario.cues.iter().cloned());
    let sequencer = Sequencer::single(&axis, Rc::clone(&view));
    let sink = journal.clone();
    sequencer.on(SequencerEventKind::Events, move |event| {
        if let SequencerEvent::Events(changes) = event {
            for change in changes.iter() {
                sink.cue(change);
            }
        }
    });

    for step in &scenario.steps {
        let step = step.clone();
        let timing = timing.clone();
        let axis = axis.clone();
        let journal = journal.clone();
        scheduler.schedule_at(step.at, move || apply(&step, &timing, &axis, &journal));
    }

    let horizon = until.unwrap_or(scenario.until);
    let fired = scheduler.advance_to(horizon);
    tracing::debug!(fired, horizon, "scenario finished");

    let position = sequencer.positions()?.first().copied().unwrap_or_default();
    let active = sequencer.keys();
    sequencer.close();
    timing.close();

    let entries = journal.entries.borrow().clone();
    Ok(Report {
        entries,
        active,
        position,
    })
}

fn apply(step: &Step, timing: &TimingObject, axis: &Axis, journal: &Journal) {
    if let Some(update) = step.update {
        match timing.update(update) {
            Ok(vector) => journal.record("script", format!("update {vector}"), serde_json::Value::Null),
            Err(err) => tracing::warn!(%err, "scripted update failed"),
        }
    }
    if let Some(range) = step.range {
        match timing.update_range(range) {
            Ok(_) => journal.record("script", format!("range {range}"), serde_json::Value::Null),
            Err(err) => tracing::warn!(%err, "scripted range change failed"),
        }
    }
    if !step.add_cues.is_empty() {
        let changes = axis.add_cues(step.add_cues.iter().cloned());
        journal.record("script", format!("add {} cues", changes.len()), serde_json::Value::Null);
    }
    if !step.remove_cues.is_empty() {
        let changes = axis.remove_cues(&step.remove_cues);
        journal.record("script", format!("remove {} cues", changes.len()), serde_json::Value::Null);
    }
}
