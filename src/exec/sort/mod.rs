// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Sorting operators and the sort-key machinery they share.
//!
//! Responsibilities:
//! - Define the sort description model (per-level direction, null placement,
//!   optional collation sequence).
//! - Encode sort keys into byte-comparable rows so every merge compares
//!   cursors with a single memcmp.
//! - Strip constant columns on ingress and re-insert them on egress.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BinaryBuilder, StringArray, UInt32Array};
use arrow::compute::{SortOptions, take};
use arrow::datatypes::{DataType, Schema};
use arrow::row::{RowConverter, Rows, SortField};

use crate::exec::block::{Block, BlockColumn};

mod cursor;
mod finish_sort;
mod merge;
mod merge_sort;
mod merge_streams;

pub use finish_sort::FinishSortStream;
pub use merge::SortedBlocksMerger;
pub use merge_sort::{MergeSortOptions, MergeSortStream};
pub use merge_streams::SortedStreamsMerger;

/// Reference to a sort-key column, by name or by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortColumnRef {
    Name(String),
    Position(usize),
}

/// Named collation sequence for string keys. Presence on a level makes that
/// level compare through the collation's sort key instead of raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collation {
    /// Case-insensitive comparison (Unicode lowercasing).
    NoCase,
    /// Trailing ASCII whitespace is ignored.
    Rtrim,
}

impl Collation {
    pub fn sort_key(&self, value: &str) -> Vec<u8> {
        match self {
            Collation::NoCase => value.to_lowercase().into_bytes(),
            Collation::Rtrim => value.trim_end_matches([' ', '\t']).as_bytes().to_vec(),
        }
    }
}

/// One level of a sort key.
#[derive(Debug, Clone)]
pub struct SortColumnDesc {
    pub column: SortColumnRef,
    pub asc: bool,
    pub nulls_first: bool,
    pub collation: Option<Collation>,
}

impl SortColumnDesc {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            column: SortColumnRef::Name(name.into()),
            asc: true,
            nulls_first: false,
            collation: None,
        }
    }

    pub fn by_position(position: usize) -> Self {
        Self {
            column: SortColumnRef::Position(position),
            asc: true,
            nulls_first: false,
            collation: None,
        }
    }
}

/// Ordered sort key, lexicographic from first to last level.
pub type SortDescription = Vec<SortColumnDesc>;

/// Removes constant columns; blocks handed to cursors never contain one.
pub fn remove_constants_from_block(block: &Block) -> Result<Block, String> {
    let schema = block.schema();
    let mut fields = Vec::new();
    let mut columns = Vec::new();
    for (field, column) in schema.fields().iter().zip(block.columns().iter()) {
        if !column.is_const() {
            fields.push(Arc::clone(field));
            columns.push(column.clone());
        }
    }
    let stripped = Arc::new(Schema::new(fields));
    Block::try_new(stripped, columns, block.rows())
}

/// Resolves every level against `header`, drops the levels that refer to
/// constant columns, and remaps positional references to the
/// constants-stripped layout.
pub fn remove_constants_from_description(
    header: &Block,
    description: &SortDescription,
) -> Result<SortDescription, String> {
    let mut kept = Vec::with_capacity(description.len());
    for level in description {
        let index = resolve_column(header, &level.column)?;
        if header.column(index).is_const() {
            continue;
        }
        let stripped_index = (0..index)
            .filter(|i| !header.column(*i).is_const())
            .count();
        let mut level = level.clone();
        if let SortColumnRef::Position(_) = level.column {
            level.column = SortColumnRef::Position(stripped_index);
        }
        kept.push(level);
    }
    Ok(kept)
}

/// Re-inserts the header's constant columns positionally, replicated to the
/// block's row count. The block must carry exactly the header's non-constant
/// columns in order; anything else is a pipeline construction error.
pub fn enrich_block_with_constants(block: &Block, header: &Block) -> Result<Block, String> {
    let mut columns = Vec::with_capacity(header.num_columns());
    let mut next_plain = 0;
    for column in header.columns() {
        match column {
            BlockColumn::Const(values) => columns.push(BlockColumn::Const(Arc::clone(values))),
            BlockColumn::Plain(_) => {
                if next_plain >= block.num_columns() {
                    return Err(
                        "constant re-insertion failed: block has fewer columns than header"
                            .to_string(),
                    );
                }
                columns.push(block.column(next_plain).clone());
                next_plain += 1;
            }
        }
    }
    if next_plain != block.num_columns() {
        return Err(
            "constant re-insertion failed: block has more columns than header".to_string(),
        );
    }
    Block::try_new(header.schema(), columns, block.rows())
}

fn resolve_column(header: &Block, column: &SortColumnRef) -> Result<usize, String> {
    match column {
        SortColumnRef::Name(name) => header
            .schema()
            .fields()
            .iter()
            .position(|f| f.name() == name)
            .ok_or_else(|| format!("sort column {name} not found in header")),
        SortColumnRef::Position(position) => {
            if *position >= header.num_columns() {
                return Err(format!(
                    "sort column position {position} out of range, header has {} columns",
                    header.num_columns()
                ));
            }
            Ok(*position)
        }
    }
}

/// How one key level is turned into an encodable column. Chosen once at
/// construction; the merge loop itself never dispatches on collation.
#[derive(Debug, Clone)]
enum KeyColumnPlan {
    Raw { index: usize },
    Collated { index: usize, collation: Collation },
}

/// Encodes a block's sort-key columns into byte-comparable rows.
///
/// All cursors of one merge must share one format so their encoded rows are
/// mutually comparable.
#[derive(Debug)]
pub struct SortKeyFormat {
    plans: Vec<KeyColumnPlan>,
    converter: Option<RowConverter>,
}

impl SortKeyFormat {
    pub fn new(header: &Block, description: &SortDescription) -> Result<Self, String> {
        let mut plans = Vec::with_capacity(description.len());
        let mut fields = Vec::with_capacity(description.len());
        for level in description {
            let index = resolve_column(header, &level.column)?;
            let options = SortOptions {
                descending: !level.asc,
                nulls_first: level.nulls_first,
            };
            match level.collation {
                Some(collation) => {
                    let data_type = header.field(index).data_type();
                    if data_type != &DataType::Utf8 {
                        return Err(format!(
                            "collation on column {} requires utf8, got {data_type}",
                            header.field(index).name()
                        ));
                    }
                    plans.push(KeyColumnPlan::Collated { index, collation });
                    fields.push(SortField::new_with_options(DataType::Binary, options));
                }
                None => {
                    plans.push(KeyColumnPlan::Raw { index });
                    fields.push(SortField::new_with_options(
                        header.field(index).data_type().clone(),
                        options,
                    ));
                }
            }
        }
        let converter = if fields.is_empty() {
            None
        } else {
            Some(
                RowConverter::new(fields)
                    .map_err(|e| format!("build sort key converter failed: {e}"))?,
            )
        };
        Ok(Self { plans, converter })
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn key_rows(&self, block: &Block) -> Result<Rows, String> {
        let converter = self
            .converter
            .as_ref()
            .ok_or_else(|| "sort key format has no key columns".to_string())?;
        let mut columns = Vec::with_capacity(self.plans.len());
        for plan in &self.plans {
            match plan {
                KeyColumnPlan::Raw { index } => columns.push(block.materialized(*index)?),
                KeyColumnPlan::Collated { index, collation } => {
                    columns.push(collation_sort_keys(&block.materialized(*index)?, *collation)?)
                }
            }
        }
        converter
            .convert_columns(&columns)
            .map_err(|e| format!("encode sort key rows failed: {e}"))
    }

    /// Sorts one block's rows under this key. Already ordered blocks are
    /// returned as is, so pre-sorted input costs one scan, not a re-sort.
    pub fn sort_block(&self, block: &Block) -> Result<Block, String> {
        if block.rows() <= 1 {
            return Ok(block.clone());
        }
        let rows = self.key_rows(block)?;
        if (1..rows.num_rows()).all(|i| rows.row(i - 1) <= rows.row(i)) {
            return Ok(block.clone());
        }
        let mut indices: Vec<u32> = (0..block.rows() as u32).collect();
        indices.sort_unstable_by(|a, b| rows.row(*a as usize).cmp(&rows.row(*b as usize)));
        let indices = UInt32Array::from(indices);

        let mut columns = Vec::with_capacity(block.num_columns());
        for c in 0..block.num_columns() {
            let values = block.materialized(c)?;
            let sorted = take(values.as_ref(), &indices, None)
                .map_err(|e| format!("reorder block rows failed: {e}"))?;
            columns.push(BlockColumn::Plain(sorted));
        }
        Block::try_new(block.schema(), columns, block.rows())
    }
}

fn collation_sort_keys(values: &ArrayRef, collation: Collation) -> Result<ArrayRef, String> {
    let strings = values
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| "collated sort key column is not a string array".to_string())?;
    let mut builder = BinaryBuilder::new();
    for i in 0..strings.len() {
        if strings.is_null(i) {
            builder.append_null();
        } else {
            builder.append_value(collation.sort_key(strings.value(i)));
        }
    }
    Ok(Arc::new(builder.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::block::block_from_columns;
    use arrow::array::Int64Array;
    use arrow::datatypes::Field;
    use arrow::datatypes::FieldRef;

    fn header_with_constant() -> Block {
        let fields: Vec<FieldRef> = vec![
            Arc::new(Field::new("c", DataType::Int64, true)),
            Arc::new(Field::new("k", DataType::Int64, true)),
        ];
        block_from_columns(
            fields,
            vec![
                BlockColumn::Const(Arc::new(Int64Array::from(vec![7]))),
                BlockColumn::Plain(Arc::new(Int64Array::from(Vec::<i64>::new()))),
            ],
            0,
        )
        .unwrap()
    }

    #[test]
    fn description_elides_constant_levels_and_remaps_positions() {
        let header = header_with_constant();
        let description = vec![
            SortColumnDesc::by_name("c"),
            SortColumnDesc::by_position(1),
        ];
        let stripped = remove_constants_from_description(&header, &description).unwrap();
        assert_eq!(stripped.len(), 1);
        assert_eq!(stripped[0].column, SortColumnRef::Position(0));
    }

    #[test]
    fn description_resolution_fails_on_unknown_column() {
        let header = header_with_constant();
        let description = vec![SortColumnDesc::by_name("missing")];
        let err = remove_constants_from_description(&header, &description)
            .expect_err("unknown column must fail");
        assert!(err.contains("not found"), "err={err}");
    }

    #[test]
    fn strip_and_enrich_round_trip_keeps_constant_position() {
        let header = header_with_constant();
        let block = block_from_columns(
            vec![
                Arc::new(Field::new("c", DataType::Int64, true)),
                Arc::new(Field::new("k", DataType::Int64, true)),
            ],
            vec![
                BlockColumn::Const(Arc::new(Int64Array::from(vec![7]))),
                BlockColumn::Plain(Arc::new(Int64Array::from(vec![3, 1]))),
            ],
            2,
        )
        .unwrap();

        let stripped = remove_constants_from_block(&block).unwrap();
        assert_eq!(stripped.num_columns(), 1);

        let enriched = enrich_block_with_constants(&stripped, &header).unwrap();
        assert_eq!(enriched.num_columns(), 2);
        assert!(enriched.column(0).is_const());
        assert_eq!(enriched.rows(), 2);
        let constant = enriched.materialized(0).unwrap();
        let constant = constant.as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(constant.values(), &[7, 7]);
    }

    #[test]
    fn nocase_collation_orders_mixed_case() {
        let fields: Vec<FieldRef> = vec![Arc::new(Field::new("s", DataType::Utf8, true))];
        let block = block_from_columns(
            fields,
            vec![BlockColumn::Plain(Arc::new(StringArray::from(vec![
                "banana", "Apple", "cherry",
            ])))],
            3,
        )
        .unwrap();
        let mut level = SortColumnDesc::by_name("s");
        level.collation = Some(Collation::NoCase);
        let format = SortKeyFormat::new(&block.clone_empty(), &vec![level]).unwrap();
        let rows = format.key_rows(&block).unwrap();
        assert!(rows.row(1) < rows.row(0));
        assert!(rows.row(0) < rows.row(2));
    }

    #[test]
    fn sort_block_orders_rows_and_skips_sorted_input() {
        let fields: Vec<FieldRef> = vec![Arc::new(Field::new("k", DataType::Int64, true))];
        let block = block_from_columns(
            fields,
            vec![BlockColumn::Plain(Arc::new(Int64Array::from(vec![
                3, 1, 2,
            ])))],
            3,
        )
        .unwrap();
        let format =
            SortKeyFormat::new(&block.clone_empty(), &vec![SortColumnDesc::by_name("k")]).unwrap();

        let sorted = format.sort_block(&block).unwrap();
        let values = sorted.materialized(0).unwrap();
        let values = values.as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(values.values(), &[1, 2, 3]);

        let again = format.sort_block(&sorted).unwrap();
        let values = again.materialized(0).unwrap();
        let values = values.as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(values.values(), &[1, 2, 3]);
    }

    #[test]
    fn collation_on_integer_column_is_rejected() {
        let header = header_with_constant();
        let mut level = SortColumnDesc::by_name("k");
        level.collation = Some(Collation::Rtrim);
        let err =
            SortKeyFormat::new(&header, &vec![level]).expect_err("collation needs utf8 column");
        assert!(err.contains("requires utf8"), "err={err}");
    }
}
