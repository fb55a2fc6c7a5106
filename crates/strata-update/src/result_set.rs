//! What a command contributes to a batch's result stream.

use std::ops::BitOr;
use strata_core::{ResultSet, Row};

/// Bit flags describing the result-stream segment one command produces.
///
/// The numeric values are shared between the SQL generators and the batch
/// consumer; combinations stay distinguishable with [`contains`](Self::contains)
/// (`3` is a row that is not last in its result set, `5` a row that is).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResultSetMapping(u8);

impl ResultSetMapping {
    /// The command produces no result rows.
    pub const NO_RESULTS: Self = Self(0);
    /// The command produces a row.
    pub const HAS_RESULT_ROW: Self = Self(1);
    /// The command's row is followed by rows of later commands in the same result set.
    pub const NOT_LAST_IN_RESULT_SET: Self = Self(3);
    /// The command's row ends its result set.
    pub const LAST_IN_RESULT_SET: Self = Self(5);
    /// The result set holds a single rows-affected count.
    pub const RESULT_SET_WITH_ROWS_AFFECTED_ONLY: Self = Self(9);
    /// Rows carry a trailing column with the position of the originating command.
    pub const IS_POSITIONAL_RESULT_MAPPING_ENABLED: Self = Self(17);
    /// Values come back through output parameters.
    pub const HAS_OUTPUT_PARAMETERS: Self = Self(32);

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Are all bits of `flag` set?
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub const fn has_result_row(self) -> bool {
        self.contains(Self::HAS_RESULT_ROW)
    }

    pub const fn is_last_in_result_set(self) -> bool {
        self.contains(Self::LAST_IN_RESULT_SET)
    }

    pub const fn is_not_last_in_result_set(self) -> bool {
        self.contains(Self::NOT_LAST_IN_RESULT_SET)
    }

    pub const fn is_rows_affected_only(self) -> bool {
        self.contains(Self::RESULT_SET_WITH_ROWS_AFFECTED_ONLY)
    }

    pub const fn is_positional(self) -> bool {
        self.contains(Self::IS_POSITIONAL_RESULT_MAPPING_ENABLED)
    }

    pub const fn has_output_parameters(self) -> bool {
        self.contains(Self::HAS_OUTPUT_PARAMETERS)
    }
}

impl BitOr for ResultSetMapping {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Forward-only reader over the result sets of one executed batch.
#[derive(Debug)]
pub struct ResultStream {
    sets: Vec<ResultSet>,
    set: usize,
    row: usize,
}

impl ResultStream {
    pub fn new(sets: Vec<ResultSet>) -> Self {
        Self {
            sets,
            set: 0,
            row: 0,
        }
    }

    /// Advance to the next row of the current result set.
    pub fn read(&mut self) -> Option<&Row> {
        let row = self.sets.get(self.set)?.rows().get(self.row)?;
        self.row += 1;
        Some(row)
    }

    /// Advance to the next result set; `false` when there is none.
    pub fn next_result(&mut self) -> bool {
        if self.set < self.sets.len() {
            self.set += 1;
            self.row = 0;
        }
        self.set < self.sets.len()
    }

    /// Result sets not yet reached (including the current one).
    pub fn remaining(&self) -> usize {
        self.sets.len().saturating_sub(self.set)
    }
}
