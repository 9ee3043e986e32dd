use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use lessonmd::parser::Parser;
use lessonmd::query;
use lessonmd::section::Section;

use crate::backend::{ChartBackend, EmbeddedAtlas, EmbeddedCharts, MapBackend};
use crate::dataset::DatasetContext;
use crate::error::{ExecutionFault, LoadError, SessionError, Warning};
use crate::executor;
use crate::value::Output;

/// Session-wide knobs, fixed at load time.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// When on, sections unlock one at a time as earlier sections are
    /// completed. When off, every section starts unlocked.
    pub progressive: bool,
    /// Wall-clock guard per submission; a run past this budget faults.
    pub time_budget: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            progressive: true,
            time_budget: None,
        }
    }
}

/// Section gate. Transitions are monotonic: Locked -> Unlocked -> Completed,
/// never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Locked,
    Unlocked,
    Completed,
}

impl LockState {
    pub fn is_unlocked(&self) -> bool {
        !matches!(self, LockState::Locked)
    }
}

/// Exercise run status. Cycles idle -> running -> succeeded/failed, and
/// back through running on resubmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Running,
    Succeeded,
    Failed,
}

/// A section plus its gate state.
#[derive(Debug, Clone)]
pub struct SectionState {
    section: Section,
    lock: LockState,
}

impl SectionState {
    pub fn title(&self) -> &str {
        &self.section.title
    }

    pub fn lock(&self) -> LockState {
        self.lock
    }

    pub fn section(&self) -> &Section {
        &self.section
    }

    pub fn exercise_ids(&self) -> Vec<&str> {
        self.section.exercises().map(|e| e.id.as_str()).collect()
    }
}

/// An exercise block's live state: learner-edited code, run status, and
/// the last Output. The author default is kept for reset.
#[derive(Debug, Clone)]
pub struct ExerciseState {
    id: String,
    default_code: String,
    source: Option<String>,
    code: String,
    status: Status,
    output: Option<Output>,
    warnings: Vec<Warning>,
    fault: Option<ExecutionFault>,
}

impl ExerciseState {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn default_code(&self) -> &str {
        &self.default_code
    }

    /// The implicit `data=` dataset, if the block declared one.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Last successful Output. Kept across failed submissions until a
    /// later successful run replaces it.
    pub fn output(&self) -> Option<&Output> {
        self.output.as_ref()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// The fault from the most recent run, if it failed.
    pub fn fault(&self) -> Option<&ExecutionFault> {
        self.fault.as_ref()
    }
}

/// The result of a submission. A fault is terminal for the submission but
/// never for the session; the learner edits and resubmits.
#[derive(Debug, Clone)]
pub enum Submission {
    Completed {
        output: Output,
        warnings: Vec<Warning>,
    },
    Faulted(ExecutionFault),
}

impl Submission {
    pub fn is_completed(&self) -> bool {
        matches!(self, Submission::Completed { .. })
    }
}

/// The tutorial session controller: an ordered document of sections and
/// exercise blocks, a monotonic unlock gate per section, and an
/// execute-and-render cycle per exercise against a fixed read-only
/// dataset context.
pub struct Session {
    sections: Vec<SectionState>,
    exercises: Vec<ExerciseState>,
    exercise_index: HashMap<String, usize>,
    datasets: DatasetContext,
    config: SessionConfig,
    charts: Box<dyn ChartBackend>,
    maps: Box<dyn MapBackend>,
}

// The collaborator boxes are not Debug, so the derive is unavailable.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("sections", &self.sections)
            .field("exercises", &self.exercises)
            .field("datasets", &self.datasets)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Load a session from lesson Markdown with the embedded collaborators.
    pub fn load(source: &str, config: SessionConfig) -> Result<Self, LoadError> {
        Self::load_with_backends(
            source,
            config,
            Box::new(EmbeddedCharts),
            Box::new(EmbeddedAtlas),
        )
    }

    /// Load a session from a lesson file on disk.
    pub fn load_file(path: impl AsRef<Path>, config: SessionConfig) -> Result<Self, LoadError> {
        let source = std::fs::read_to_string(path)?;
        Self::load(&source, config)
    }

    /// Load with caller-supplied charting/mapping collaborators.
    pub fn load_with_backends(
        source: &str,
        config: SessionConfig,
        charts: Box<dyn ChartBackend>,
        maps: Box<dyn MapBackend>,
    ) -> Result<Self, LoadError> {
        let lesson = Parser::new(source.to_string(), 0)
            .parse()
            .map_err(LoadError::Parse)?;

        if lesson.sections.is_empty() {
            return Err(LoadError::EmptyDocument);
        }

        let datasets = DatasetContext::from_decls(&lesson.datasets);

        let mut exercises = Vec::new();
        let mut exercise_index = HashMap::new();
        for section in &lesson.sections {
            for decl in section.exercises() {
                exercise_index.insert(decl.id.clone(), exercises.len());
                exercises.push(ExerciseState {
                    id: decl.id.clone(),
                    default_code: decl.code.clone(),
                    source: decl.source.clone(),
                    code: decl.code.clone(),
                    status: Status::Idle,
                    output: None,
                    warnings: Vec::new(),
                    fault: None,
                });
            }
        }

        let sections = lesson
            .sections
            .into_iter()
            .enumerate()
            .map(|(i, section)| SectionState {
                section,
                lock: if !config.progressive || i == 0 {
                    LockState::Unlocked
                } else {
                    LockState::Locked
                },
            })
            .collect();

        Ok(Session {
            sections,
            exercises,
            exercise_index,
            datasets,
            config,
            charts,
            maps,
        })
    }

    // -----------------------------------------------------------------------
    // Progression
    // -----------------------------------------------------------------------

    /// Mark a section complete and unlock the next one (progressive mode).
    /// Completing an already-unlocked or already-completed section is a
    /// successful no-op; an unknown section id changes no lock state.
    pub fn advance(&mut self, section_title: &str) -> Result<(), SessionError> {
        let idx = self
            .sections
            .iter()
            .position(|s| s.section.title == section_title)
            .ok_or_else(|| SessionError::UnknownSection(section_title.to_string()))?;

        self.sections[idx].lock = LockState::Completed;
        if self.config.progressive {
            if let Some(next) = self.sections.get_mut(idx + 1) {
                if next.lock == LockState::Locked {
                    next.lock = LockState::Unlocked;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Exercise cycle
    // -----------------------------------------------------------------------

    /// Replace an exercise block's code and run it against the dataset
    /// context in an isolated scope. A fault leaves the prior Output
    /// untouched and never affects section lock state.
    pub fn submit(
        &mut self,
        exercise_id: &str,
        new_code: &str,
    ) -> Result<Submission, SessionError> {
        let idx = *self
            .exercise_index
            .get(exercise_id)
            .ok_or_else(|| SessionError::UnknownExercise(exercise_id.to_string()))?;

        self.exercises[idx].code = new_code.to_string();
        self.exercises[idx].status = Status::Running;
        let implicit_source = self.exercises[idx].source.clone();

        let deadline = self.config.time_budget.map(|budget| Instant::now() + budget);
        let result = query::parse_program(new_code)
            .map_err(ExecutionFault::from)
            .and_then(|program| {
                executor::run(
                    &program,
                    &self.datasets,
                    implicit_source.as_deref(),
                    self.charts.as_ref(),
                    self.maps.as_ref(),
                    deadline,
                )
            });

        let exercise = &mut self.exercises[idx];
        match result {
            Ok((output, warnings)) => {
                exercise.status = Status::Succeeded;
                exercise.output = Some(output.clone());
                exercise.warnings = warnings.clone();
                exercise.fault = None;
                Ok(Submission::Completed { output, warnings })
            }
            Err(fault) => {
                exercise.status = Status::Failed;
                exercise.warnings.clear();
                exercise.fault = Some(fault.clone());
                Ok(Submission::Faulted(fault))
            }
        }
    }

    /// Restore an exercise block to its author-default code and clear its
    /// Output and status.
    pub fn reset(&mut self, exercise_id: &str) -> Result<(), SessionError> {
        let idx = *self
            .exercise_index
            .get(exercise_id)
            .ok_or_else(|| SessionError::UnknownExercise(exercise_id.to_string()))?;

        let exercise = &mut self.exercises[idx];
        exercise.code = exercise.default_code.clone();
        exercise.status = Status::Idle;
        exercise.output = None;
        exercise.warnings.clear();
        exercise.fault = None;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Read access (for rendering)
    // -----------------------------------------------------------------------

    pub fn sections(&self) -> &[SectionState] {
        &self.sections
    }

    pub fn section(&self, title: &str) -> Option<&SectionState> {
        self.sections.iter().find(|s| s.section.title == title)
    }

    pub fn exercises(&self) -> impl Iterator<Item = &ExerciseState> {
        self.exercises.iter()
    }

    pub fn exercise(&self, id: &str) -> Option<&ExerciseState> {
        self.exercise_index.get(id).map(|&i| &self.exercises[i])
    }

    pub fn datasets(&self) -> &DatasetContext {
        &self.datasets
    }

    pub fn progressive(&self) -> bool {
        self.config.progressive
    }
}
