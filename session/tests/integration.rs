use std::io::Write;
use std::time::Duration;

use session::{
    Cell, LoadError, LockState, Output, Session, SessionConfig, SessionError, Status, Submission,
};

const PULSE_LESSON: &str = r#"# Dataset: Pulse

| Age | Income | Gender |
|-----|--------|--------|
| 23  | 41000  | F      |
| 35  | 52000  | M      |
| 41  | 61000  | F      |
| 29  | 38000  | M      |

# Getting Started

Welcome to the lesson.

```exercise id=warmup data=Pulse
select Age, Income
```

# Filtering

```exercise id=above-thirty
from Pulse
filter Age > 30
```

# Visualizing

```exercise id=income-chart
from Pulse
chart scatter x=Age y=Income
```
"#;

fn load(source: &str) -> Session {
    Session::load(source, SessionConfig::default()).expect("load failed")
}

fn submit(session: &mut Session, id: &str, code: &str) -> Submission {
    session.submit(id, code).expect("submit rejected")
}

fn expect_table(submission: Submission) -> session::Table {
    match submission {
        Submission::Completed {
            output: Output::Table(table),
            ..
        } => table,
        other => panic!("expected a table output, got: {:?}", other),
    }
}

fn expect_fault(submission: Submission) -> session::ExecutionFault {
    match submission {
        Submission::Faulted(fault) => fault,
        other => panic!("expected a fault, got: {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Loading and document structure
// ---------------------------------------------------------------------------

#[test]
fn sections_in_document_order() {
    let session = load(PULSE_LESSON);
    let titles: Vec<&str> = session.sections().iter().map(|s| s.title()).collect();
    assert_eq!(titles, ["Getting Started", "Filtering", "Visualizing"]);
}

#[test]
fn dataset_declarations_are_not_sections() {
    let session = load(PULSE_LESSON);
    assert!(session.sections().iter().all(|s| s.title() != "Dataset: Pulse"));
    assert_eq!(session.datasets().names(), ["Pulse"]);
}

#[test]
fn dataset_cells_are_coerced_once() {
    let session = load(PULSE_LESSON);
    let pulse = session.datasets().get("Pulse").unwrap();
    assert_eq!(pulse.row_count(), 4);
    assert_eq!(pulse.rows[0][0], Cell::Number(23.0));
    assert_eq!(pulse.rows[0][2], Cell::Str("F".to_string()));
}

#[test]
fn exercise_defaults_recorded() {
    let session = load(PULSE_LESSON);
    let warmup = session.exercise("warmup").unwrap();
    assert_eq!(warmup.code(), warmup.default_code());
    assert_eq!(warmup.source(), Some("Pulse"));
    assert_eq!(warmup.status(), Status::Idle);
    assert!(warmup.output().is_none());
}

#[test]
fn exercises_without_ids_get_positional_ones() {
    let source = "# Dataset: D\n\n| A |\n|---|\n| 1 |\n\n# One\n\n```exercise\nfrom D\nselect A\n```\n";
    let session = load(source);
    assert!(session.exercise("1.1").is_some());
}

#[test]
fn empty_document_is_a_load_error() {
    let result = Session::load("just some prose, no headings", SessionConfig::default());
    assert!(matches!(result, Err(LoadError::EmptyDocument)));
}

#[test]
fn duplicate_section_is_a_load_error() {
    let source = "# Intro\n\nHello.\n\n# Intro\n\nAgain.\n";
    let error = Session::load(source, SessionConfig::default()).unwrap_err();
    assert!(error.to_string().contains("duplicate section 'Intro'"));
}

#[test]
fn duplicate_exercise_id_is_a_load_error() {
    let source = "# Dataset: D\n\n| A |\n|---|\n| 1 |\n\n# One\n\n```exercise id=e\nfrom D\nselect A\n```\n\n```exercise id=e\nfrom D\nselect A\n```\n";
    let error = Session::load(source, SessionConfig::default()).unwrap_err();
    assert!(error.to_string().contains("duplicate exercise id 'e'"));
}

#[test]
fn duplicate_dataset_is_a_load_error() {
    let source = "# Dataset: D\n\n| A |\n|---|\n| 1 |\n\n# Dataset: D\n\n| A |\n|---|\n| 2 |\n\n# One\n\nHi.\n";
    let error = Session::load(source, SessionConfig::default()).unwrap_err();
    assert!(error.to_string().contains("duplicate dataset 'D'"));
}

#[test]
fn validation_reports_every_error() {
    // A duplicate section and an undeclared dataset read in the same
    // document both show up in one load failure.
    let source = "# One\n\nHi.\n\n# One\n\n```exercise id=e\nfrom Ghost\nselect A\n```\n";
    let error = Session::load(source, SessionConfig::default()).unwrap_err();
    let text = error.to_string();
    assert!(text.contains("duplicate section 'One'"), "error: {}", text);
    assert!(text.contains("undeclared dataset 'Ghost'"), "error: {}", text);
}

#[test]
fn dataset_without_table_is_a_load_error() {
    let source = "# Dataset: Empty\n\nNo table here.\n\n# One\n\nHi.\n";
    let error = Session::load(source, SessionConfig::default()).unwrap_err();
    assert!(error.to_string().contains("exactly one table"));
}

#[test]
fn default_code_reading_undeclared_dataset_is_a_load_error() {
    let source = "# One\n\n```exercise id=e\nfrom Ghost\nselect A\n```\n";
    let error = Session::load(source, SessionConfig::default()).unwrap_err();
    assert!(error.to_string().contains("undeclared dataset 'Ghost'"));
}

#[test]
fn unparseable_default_code_is_a_load_error() {
    let source = "# One\n\n```exercise id=e\nfrobnicate everything\n```\n";
    let error = Session::load(source, SessionConfig::default()).unwrap_err();
    assert!(error.to_string().contains("does not parse"));
}

#[test]
fn binding_to_unknown_dataset_is_a_load_error() {
    let source = "# One\n\n```exercise id=e data=Ghost\nselect A\n```\n";
    let error = Session::load(source, SessionConfig::default()).unwrap_err();
    assert!(error.to_string().contains("unknown dataset 'Ghost'"));
}

#[test]
fn load_file_reads_from_disk() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("lesson.md");
    let mut file = std::fs::File::create(&path).unwrap();
    write!(file, "{}", PULSE_LESSON).unwrap();

    let session = Session::load_file(&path, SessionConfig::default()).expect("load_file failed");
    assert_eq!(session.sections().len(), 3);
}

#[test]
fn load_file_missing_is_an_io_error() {
    let result = Session::load_file("/nonexistent/lesson.md", SessionConfig::default());
    assert!(matches!(result, Err(LoadError::Io(_))));
}

// ---------------------------------------------------------------------------
// Progression
// ---------------------------------------------------------------------------

#[test]
fn progressive_initial_locks() {
    let session = load(PULSE_LESSON);
    let locks: Vec<LockState> = session.sections().iter().map(|s| s.lock()).collect();
    assert_eq!(locks, [LockState::Unlocked, LockState::Locked, LockState::Locked]);
}

#[test]
fn advance_unlocks_only_the_next_section() {
    let mut session = load(PULSE_LESSON);
    session.advance("Getting Started").unwrap();

    let locks: Vec<LockState> = session.sections().iter().map(|s| s.lock()).collect();
    assert_eq!(
        locks,
        [LockState::Completed, LockState::Unlocked, LockState::Locked]
    );
}

#[test]
fn advance_unknown_section_changes_no_lock_state() {
    let mut session = load(PULSE_LESSON);
    let before: Vec<LockState> = session.sections().iter().map(|s| s.lock()).collect();

    let err = session.advance("Nonexistent").unwrap_err();
    assert_eq!(err, SessionError::UnknownSection("Nonexistent".to_string()));

    let after: Vec<LockState> = session.sections().iter().map(|s| s.lock()).collect();
    assert_eq!(before, after);
}

#[test]
fn advancing_the_last_section_is_fine() {
    let mut session = load(PULSE_LESSON);
    session.advance("Getting Started").unwrap();
    session.advance("Filtering").unwrap();
    session.advance("Visualizing").unwrap();
    assert!(session.sections().iter().all(|s| s.lock() == LockState::Completed));
}

#[test]
fn advance_never_relocks_a_completed_section() {
    let mut session = load(PULSE_LESSON);
    session.advance("Getting Started").unwrap();
    session.advance("Filtering").unwrap();
    // Re-completing an earlier section must not lock anything again.
    session.advance("Getting Started").unwrap();

    let locks: Vec<LockState> = session.sections().iter().map(|s| s.lock()).collect();
    assert_eq!(
        locks,
        [LockState::Completed, LockState::Completed, LockState::Unlocked]
    );
}

#[test]
fn non_progressive_sessions_start_fully_unlocked() {
    let config = SessionConfig {
        progressive: false,
        time_budget: None,
    };
    let session = Session::load(PULSE_LESSON, config).unwrap();
    assert!(session.sections().iter().all(|s| s.lock() == LockState::Unlocked));
}

// ---------------------------------------------------------------------------
// Submission cycle
// ---------------------------------------------------------------------------

#[test]
fn default_code_submission_succeeds() {
    let mut session = load(PULSE_LESSON);
    let table = expect_table(submit(&mut session, "warmup", "select Age, Income"));
    assert_eq!(table.columns, ["Age", "Income"]);
    assert_eq!(table.row_count(), 4);
    assert_eq!(session.exercise("warmup").unwrap().status(), Status::Succeeded);
}

#[test]
fn unknown_column_faults_and_names_the_column() {
    let mut session = load(PULSE_LESSON);
    let fault = expect_fault(submit(&mut session, "warmup", "select Age, Height"));
    assert!(fault.message.contains("Height"), "fault: {}", fault);
    assert!(fault.message.contains("unknown column"), "fault: {}", fault);
    assert_eq!(fault.line, Some(1));
    assert_eq!(session.exercise("warmup").unwrap().status(), Status::Failed);
}

#[test]
fn fault_keeps_the_prior_output() {
    let mut session = load(PULSE_LESSON);
    submit(&mut session, "warmup", "select Age, Income");

    let fault = expect_fault(submit(&mut session, "warmup", "select Age, Height"));
    assert!(fault.message.contains("Height"));

    let warmup = session.exercise("warmup").unwrap();
    assert_eq!(warmup.status(), Status::Failed);
    // The Output from the earlier successful run is still visible.
    match warmup.output() {
        Some(Output::Table(table)) => assert_eq!(table.columns, ["Age", "Income"]),
        other => panic!("expected the prior table output, got: {:?}", other),
    }
    assert!(warmup.fault().is_some());
}

#[test]
fn fault_never_changes_lock_state() {
    let mut session = load(PULSE_LESSON);
    session.advance("Getting Started").unwrap();
    let before: Vec<LockState> = session.sections().iter().map(|s| s.lock()).collect();

    expect_fault(submit(&mut session, "above-thirty", "from Altitude\nsummarize"));

    let after: Vec<LockState> = session.sections().iter().map(|s| s.lock()).collect();
    assert_eq!(before, after);
}

#[test]
fn unknown_dataset_faults() {
    let mut session = load(PULSE_LESSON);
    let fault = expect_fault(submit(&mut session, "above-thirty", "from Altitude\nselect Age"));
    assert!(fault.message.contains("unknown dataset 'Altitude'"), "fault: {}", fault);
}

#[test]
fn parse_error_faults_with_a_line() {
    let mut session = load(PULSE_LESSON);
    let fault = expect_fault(submit(
        &mut session,
        "above-thirty",
        "from Pulse\nfrobnicate Age",
    ));
    assert!(fault.message.contains("unknown stage 'frobnicate'"), "fault: {}", fault);
    assert_eq!(fault.line, Some(2));
}

#[test]
fn nothing_may_follow_a_terminal_stage() {
    let mut session = load(PULSE_LESSON);
    let fault = expect_fault(submit(
        &mut session,
        "above-thirty",
        "from Pulse\nsummarize\nselect Age",
    ));
    assert!(fault.message.contains("nothing may follow 'summarize'"), "fault: {}", fault);
}

#[test]
fn submit_unknown_exercise_is_rejected() {
    let mut session = load(PULSE_LESSON);
    let err = session.submit("ghost", "select Age").unwrap_err();
    assert_eq!(err, SessionError::UnknownExercise("ghost".to_string()));
}

#[test]
fn implicit_source_requires_a_data_binding() {
    let mut session = load(PULSE_LESSON);
    // above-thirty has no data= attribute, so a bare stage has no source.
    let fault = expect_fault(submit(&mut session, "above-thirty", "select Age"));
    assert!(fault.message.contains("no source dataset"), "fault: {}", fault);
}

#[test]
fn reset_restores_the_author_default() {
    let mut session = load(PULSE_LESSON);
    submit(&mut session, "warmup", "select Gender");
    session.reset("warmup").unwrap();

    let warmup = session.exercise("warmup").unwrap();
    assert_eq!(warmup.code(), "select Age, Income\n");
    assert_eq!(warmup.status(), Status::Idle);
    assert!(warmup.output().is_none());
    assert!(warmup.fault().is_none());
}

#[test]
fn reset_unknown_exercise_is_rejected() {
    let mut session = load(PULSE_LESSON);
    let err = session.reset("ghost").unwrap_err();
    assert_eq!(err, SessionError::UnknownExercise("ghost".to_string()));
}

#[test]
fn datasets_are_never_mutated_by_submissions() {
    let mut session = load(PULSE_LESSON);
    submit(&mut session, "above-thirty", "from Pulse\nfilter Age > 30");
    submit(&mut session, "above-thirty", "from Pulse\nhead 1");

    let pulse = session.datasets().get("Pulse").unwrap();
    assert_eq!(pulse.row_count(), 4);
    assert_eq!(pulse.columns, ["Age", "Income", "Gender"]);
}

#[test]
fn zero_time_budget_faults() {
    let config = SessionConfig {
        progressive: true,
        time_budget: Some(Duration::ZERO),
    };
    let mut session = Session::load(PULSE_LESSON, config).unwrap();
    let fault = expect_fault(submit(&mut session, "warmup", "select Age"));
    assert!(fault.message.contains("time budget"), "fault: {}", fault);
}

// ---------------------------------------------------------------------------
// Pipeline semantics
// ---------------------------------------------------------------------------

#[test]
fn filter_and_sort() {
    let mut session = load(PULSE_LESSON);
    let table = expect_table(submit(
        &mut session,
        "above-thirty",
        "from Pulse\nfilter Age > 30\nsort Income desc",
    ));
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.rows[0][0], Cell::Number(41.0));
    assert_eq!(table.rows[1][0], Cell::Number(35.0));
}

#[test]
fn filter_on_strings() {
    let mut session = load(PULSE_LESSON);
    let table = expect_table(submit(
        &mut session,
        "above-thirty",
        "from Pulse\nfilter Gender == \"F\"",
    ));
    assert_eq!(table.row_count(), 2);
}

#[test]
fn type_mismatched_filter_matches_nothing() {
    let mut session = load(PULSE_LESSON);
    // Gender holds strings; an ordering comparison against a number drops
    // every row rather than faulting.
    let table = expect_table(submit(
        &mut session,
        "above-thirty",
        "from Pulse\nfilter Gender > 5",
    ));
    assert_eq!(table.row_count(), 0);
}

#[test]
fn head_truncates() {
    let mut session = load(PULSE_LESSON);
    let table = expect_table(submit(&mut session, "above-thirty", "from Pulse\nhead 2"));
    assert_eq!(table.row_count(), 2);
}

#[test]
fn bindings_feed_later_pipelines() {
    let mut session = load(PULSE_LESSON);
    let code = "adults = from Pulse\nfilter Age > 30\nfrom adults\nselect Income";
    let table = expect_table(submit(&mut session, "above-thirty", code));
    assert_eq!(table.columns, ["Income"]);
    assert_eq!(table.row_count(), 2);
}

#[test]
fn bindings_do_not_leak_between_submissions() {
    let mut session = load(PULSE_LESSON);
    submit(&mut session, "above-thirty", "adults = from Pulse\nfilter Age > 30");

    let fault = expect_fault(submit(&mut session, "above-thirty", "from adults\nselect Age"));
    assert!(fault.message.contains("unknown dataset 'adults'"), "fault: {}", fault);
}

#[test]
fn rebinding_a_dataset_name_faults() {
    let mut session = load(PULSE_LESSON);
    let fault = expect_fault(submit(&mut session, "above-thirty", "Pulse = from Pulse"));
    assert!(fault.message.contains("cannot rebind source dataset 'Pulse'"), "fault: {}", fault);
}

#[test]
fn comments_and_blank_lines_are_skipped() {
    let mut session = load(PULSE_LESSON);
    let code = "# look at ages\n\nfrom Pulse\n# only adults\nfilter Age > 30\n";
    let table = expect_table(submit(&mut session, "above-thirty", code));
    assert_eq!(table.row_count(), 2);
}

#[test]
fn summarize_reports_numeric_and_text_columns() {
    let mut session = load(PULSE_LESSON);
    let submission = submit(&mut session, "above-thirty", "from Pulse\nsummarize");
    let Submission::Completed {
        output: Output::Text(text),
        ..
    } = submission
    else {
        panic!("expected text output");
    };

    assert!(text.contains("4 rows x 3 columns"), "summary: {}", text);
    assert!(text.contains("Age: min 23, mean 32, max 41"), "summary: {}", text);
    assert!(text.contains("Gender: (text)"), "summary: {}", text);
}

// ---------------------------------------------------------------------------
// Charts and maps
// ---------------------------------------------------------------------------

#[test]
fn chart_produces_an_opaque_widget() {
    let mut session = load(PULSE_LESSON);
    let submission = submit(&mut session, "income-chart", "from Pulse\nchart scatter x=Age y=Income");
    let Submission::Completed {
        output: Output::Widget(handle),
        warnings,
    } = submission
    else {
        panic!("expected a widget output");
    };

    assert!(warnings.is_empty());
    assert_eq!(handle.kind(), "chart");
    let rendered = handle.render();
    assert!(rendered.contains("scatter"), "rendered: {}", rendered);
    assert!(rendered.contains("4 points"), "rendered: {}", rendered);
}

#[test]
fn plot_produces_a_static_svg() {
    let mut session = load(PULSE_LESSON);
    let submission = submit(&mut session, "income-chart", "from Pulse\nplot line x=Age y=Income");
    let Submission::Completed {
        output: Output::Image(image),
        ..
    } = submission
    else {
        panic!("expected an image output");
    };

    assert_eq!(image.format, "svg");
    assert!(image.data.starts_with("<svg"), "data: {}", image.data);
}

#[test]
fn single_bar_plot_stays_on_canvas() {
    let mut session = load(PULSE_LESSON);
    let submission = submit(
        &mut session,
        "income-chart",
        "from Pulse\nhead 1\nplot bar x=Gender y=Income",
    );
    let Submission::Completed {
        output: Output::Image(image),
        ..
    } = submission
    else {
        panic!("expected an image output");
    };

    // One wide bar must still be drawn entirely inside the canvas.
    assert!(!image.data.contains("x=\"-"), "data: {}", image.data);
}

#[test]
fn chart_popup_is_a_warning_not_a_fault() {
    let mut session = load(PULSE_LESSON);
    let submission = submit(
        &mut session,
        "income-chart",
        "from Pulse\nchart bar x=Gender y=Income popup=Gender",
    );
    let Submission::Completed { warnings, .. } = submission else {
        panic!("expected a degraded success, not a fault");
    };

    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("popup"), "warning: {}", warnings[0]);
    assert_eq!(warnings[0].line, Some(2));

    let chart = session.exercise("income-chart").unwrap();
    assert_eq!(chart.status(), Status::Succeeded);
    assert_eq!(chart.warnings().len(), 1);
}

#[test]
fn scatter_requires_numeric_x() {
    let mut session = load(PULSE_LESSON);
    let fault = expect_fault(submit(
        &mut session,
        "income-chart",
        "from Pulse\nchart scatter x=Gender y=Income",
    ));
    assert!(fault.message.contains("non-numeric"), "fault: {}", fault);
    assert!(fault.message.contains("Gender"), "fault: {}", fault);
}

#[test]
fn chart_requires_numeric_y() {
    let mut session = load(PULSE_LESSON);
    let fault = expect_fault(submit(
        &mut session,
        "income-chart",
        "from Pulse\nchart bar x=Age y=Gender",
    ));
    assert!(fault.message.contains("non-numeric"), "fault: {}", fault);
}

#[test]
fn a_later_success_clears_the_fault_and_warnings() {
    let mut session = load(PULSE_LESSON);
    expect_fault(submit(&mut session, "warmup", "select Height"));
    submit(&mut session, "warmup", "select Age");

    let warmup = session.exercise("warmup").unwrap();
    assert_eq!(warmup.status(), Status::Succeeded);
    assert!(warmup.fault().is_none());
    assert!(warmup.warnings().is_empty());
}

const CITIES_LESSON: &str = r#"# Dataset: Cities

| Name     | Lon   | Lat   |
|----------|-------|-------|
| Nairobi  | 36.82 | -1.29 |
| Helsinki | 24.94 | 60.17 |
| Lima     | -77.03 | -12.05 |

# Maps

```exercise id=city-map data=Cities
map lon=Lon lat=Lat
```
"#;

#[test]
fn map_produces_an_opaque_widget() {
    let mut session = load(CITIES_LESSON);
    let submission = submit(
        &mut session,
        "city-map",
        "map lon=Lon lat=Lat popup=Name tiles=terrain caption=\"Three cities\"",
    );
    let Submission::Completed {
        output: Output::Widget(handle),
        ..
    } = submission
    else {
        panic!("expected a widget output");
    };

    assert_eq!(handle.kind(), "map");
    let rendered = handle.render();
    assert!(rendered.contains("3 of 3 rows"), "rendered: {}", rendered);
    assert!(rendered.contains("with popups"), "rendered: {}", rendered);
    assert!(rendered.contains("terrain tiles"), "rendered: {}", rendered);
    assert!(rendered.contains("caption \"Three cities\""), "rendered: {}", rendered);
}

#[test]
fn map_requires_numeric_coordinates() {
    let mut session = load(CITIES_LESSON);
    let fault = expect_fault(submit(&mut session, "city-map", "map lon=Name lat=Lat"));
    assert!(fault.message.contains("non-numeric"), "fault: {}", fault);
}
