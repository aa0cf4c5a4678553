use chrono::NaiveDate;
use tracing::debug;

use crate::join::cell::CellIndex;
use crate::join::types::WorkEvent;

/// Works active on one date, bucketed by cell.
pub type ActiveWorkIndex = CellIndex<WorkEvent>;

/// Builds the index of works active on `date`.
///
/// Inactive works and works without a usable position are left out. An empty
/// supply yields an empty index.
pub fn build_active_index<I>(works: I, date: NaiveDate) -> ActiveWorkIndex
where
    I: IntoIterator<Item = WorkEvent>,
{
    let mut index = ActiveWorkIndex::new();
    let mut seen = 0usize;
    let mut inactive = 0usize;
    let mut unplaced = 0usize;

    for work in works {
        seen += 1;
        if !work.is_active_on(date) {
            inactive += 1;
            continue;
        }
        let position = work.position;
        if !index.insert(position, work) {
            unplaced += 1;
        }
    }

    debug!(
        %date,
        seen,
        inactive,
        unplaced,
        indexed = index.len(),
        cells = index.cell_count(),
        "Active work index built"
    );

    index
}
