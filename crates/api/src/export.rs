// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! CSV export of historical attendance.
//!
//! Rows are streamed out of the store in bounded batches, so memory use does
//! not grow with the requested range. Output follows the standard CSV
//! convention: CRLF line endings, header row present, fields containing
//! commas, quotes, or newlines double-quoted with internal quotes doubled.

use chrono::NaiveDate;
use csv::{Terminator, WriterBuilder};
use paceline_persistence::{Persistence, PersistenceError};
use std::io::Write;
use tracing::info;

use crate::error::ApiError;

/// Export header row.
pub const EXPORT_HEADER: [&str; 5] = ["id", "run_date", "runner_id", "registered_at", "session_code"];

/// Timestamp format used in exported rows.
const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Streams historical attendance as CSV.
pub struct ExportService;

impl ExportService {
    /// Writes the CSV export for a date window into `writer`.
    ///
    /// An empty or inverted range produces only the header row. Returns the
    /// number of data rows written.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the writer fails.
    pub fn export_csv<W: Write>(
        store: &Persistence,
        start: NaiveDate,
        end: NaiveDate,
        writer: W,
    ) -> Result<usize, ApiError> {
        let mut csv_writer = WriterBuilder::new()
            .terminator(Terminator::CRLF)
            .from_writer(writer);

        csv_writer
            .write_record(EXPORT_HEADER)
            .map_err(|e| ApiError::Internal {
                message: format!("failed to write CSV header: {e}"),
            })?;

        let rows: usize = store.stream_history(start, end, &mut |row| {
            csv_writer
                .write_record([
                    row.id.to_string(),
                    row.run_date.format("%Y-%m-%d").to_string(),
                    row.runner_id,
                    row.registered_at.format(EXPORT_TIMESTAMP_FORMAT).to_string(),
                    row.session_code,
                ])
                .map_err(|e| PersistenceError::QueryFailed(format!("CSV row write failed: {e}")))
        })?;

        csv_writer.flush().map_err(|e| ApiError::Internal {
            message: format!("failed to flush CSV output: {e}"),
        })?;

        info!(%start, %end, rows, "Generated CSV export");
        Ok(rows)
    }

    /// Derives the attachment filename for an export request.
    #[must_use]
    pub fn export_filename(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        today: NaiveDate,
    ) -> String {
        match (start, end) {
            (Some(s), Some(e)) => format!("attendance_export_{s}_to_{e}.csv"),
            (Some(s), None) => format!("attendance_export_from_{s}.csv"),
            (None, Some(e)) => format!("attendance_export_until_{e}.csv"),
            (None, None) => format!("attendance_export_{today}.csv"),
        }
    }
}
