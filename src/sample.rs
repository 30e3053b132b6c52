//! Demonstration table installed into an empty workspace.
use crate::database::batch::Batch;
use serde_json::Value;

/// Name of the demonstration table
pub(crate) const SAMPLE_TABLE: &str = "sample_data";

const COLUMNS: [&str; 4] = ["name", "url", "info", "note"];

const ROWS: [[&str; 4]; 3] = [
    ["BYS", "bys.marmara.edu.tr", "Information Management System", "Student affairs automation"],
    ["OBS", "obs.marmara.edu.tr", "Student Information System", "Course registration and grade viewing"],
    ["UZEM", "uzem.marmara.edu.tr", "Distance Education Center", "Online course platform"],
];

pub(crate) fn sample_batch() -> Batch {
    Batch::new(
        COLUMNS.iter().map(|column| column.to_string()).collect(),
        ROWS.iter()
            .map(|row| row.iter().map(|value| Value::from(*value)).collect())
            .collect(),
    )
}
