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
//! Columnar row batch flowing through the sorting operators.
//!
//! Responsibilities:
//! - Wrap arrow arrays together with an explicit row count so constant
//!   columns can stay materialized as a single value.
//! - Provide the slicing, conversion, and byte-accounting surface the
//!   operators need.

use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch, RecordBatchOptions, UInt32Array};
use arrow::buffer::Buffer;
use arrow::compute::take;
use arrow::datatypes::{FieldRef, Schema, SchemaRef};

/// One column of a [`Block`].
///
/// A `Const` column is logically `block.rows()` copies of a single value,
/// stored as a one-element array.
#[derive(Debug, Clone)]
pub enum BlockColumn {
    Plain(ArrayRef),
    Const(ArrayRef),
}

impl BlockColumn {
    pub fn is_const(&self) -> bool {
        matches!(self, BlockColumn::Const(_))
    }

    pub fn values(&self) -> &ArrayRef {
        match self {
            BlockColumn::Plain(values) | BlockColumn::Const(values) => values,
        }
    }
}

/// An immutable columnar row batch: ordered `(field, column)` pairs plus an
/// explicit row count.
#[derive(Debug, Clone)]
pub struct Block {
    schema: SchemaRef,
    columns: Vec<BlockColumn>,
    rows: usize,
}

impl Block {
    pub fn try_new(
        schema: SchemaRef,
        columns: Vec<BlockColumn>,
        rows: usize,
    ) -> Result<Self, String> {
        if schema.fields().len() != columns.len() {
            return Err(format!(
                "block has {} columns but schema has {} fields",
                columns.len(),
                schema.fields().len()
            ));
        }
        for (field, column) in schema.fields().iter().zip(columns.iter()) {
            if column.values().data_type() != field.data_type() {
                return Err(format!(
                    "column {} has type {} but schema expects {}",
                    field.name(),
                    column.values().data_type(),
                    field.data_type()
                ));
            }
            match column {
                BlockColumn::Plain(values) if values.len() != rows => {
                    return Err(format!(
                        "column {} has {} rows but block has {}",
                        field.name(),
                        values.len(),
                        rows
                    ));
                }
                BlockColumn::Const(values) if values.len() != 1 => {
                    return Err(format!(
                        "constant column {} must hold exactly one value, got {}",
                        field.name(),
                        values.len()
                    ));
                }
                _ => {}
            }
        }
        Ok(Self {
            schema,
            columns,
            rows,
        })
    }

    pub fn from_record_batch(batch: &RecordBatch) -> Self {
        Self {
            schema: batch.schema(),
            columns: batch
                .columns()
                .iter()
                .cloned()
                .map(BlockColumn::Plain)
                .collect(),
            rows: batch.num_rows(),
        }
    }

    /// Converts to a record batch. Constant columns must have been removed
    /// first; hitting one here is a pipeline construction error.
    pub fn to_record_batch(&self) -> Result<RecordBatch, String> {
        let mut arrays = Vec::with_capacity(self.columns.len());
        for (field, column) in self.schema.fields().iter().zip(self.columns.iter()) {
            match column {
                BlockColumn::Plain(values) => arrays.push(Arc::clone(values)),
                BlockColumn::Const(_) => {
                    return Err(format!(
                        "constant column {} cannot be converted to a record batch",
                        field.name()
                    ));
                }
            }
        }
        RecordBatch::try_new_with_options(
            Arc::clone(&self.schema),
            arrays,
            &RecordBatchOptions::new().with_row_count(Some(self.rows)),
        )
        .map_err(|e| format!("convert block to record batch failed: {e}"))
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    pub fn field(&self, index: usize) -> &FieldRef {
        &self.schema.fields()[index]
    }

    pub fn column(&self, index: usize) -> &BlockColumn {
        &self.columns[index]
    }

    pub fn columns(&self) -> &[BlockColumn] {
        &self.columns
    }

    /// Header derivation: same columns with zero rows, constant values kept.
    pub fn clone_empty(&self) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|column| match column {
                BlockColumn::Plain(values) => BlockColumn::Plain(values.slice(0, 0)),
                BlockColumn::Const(values) => BlockColumn::Const(Arc::clone(values)),
            })
            .collect();
        Self {
            schema: Arc::clone(&self.schema),
            columns,
            rows: 0,
        }
    }

    /// Zero-copy row slice; constant columns stay constant.
    pub fn cut(&self, offset: usize, length: usize) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|column| match column {
                BlockColumn::Plain(values) => BlockColumn::Plain(values.slice(offset, length)),
                BlockColumn::Const(values) => BlockColumn::Const(Arc::clone(values)),
            })
            .collect();
        Self {
            schema: Arc::clone(&self.schema),
            columns,
            rows: length,
        }
    }

    /// Plain view of column `index`; a constant column is replicated out to
    /// the block's row count.
    pub fn materialized(&self, index: usize) -> Result<ArrayRef, String> {
        match &self.columns[index] {
            BlockColumn::Plain(values) => Ok(Arc::clone(values)),
            BlockColumn::Const(values) => {
                let indices = UInt32Array::from(vec![0u32; self.rows]);
                take(values.as_ref(), &indices, None).map_err(|e| {
                    format!(
                        "materialize constant column {} failed: {e}",
                        self.field(index).name()
                    )
                })
            }
        }
    }

    /// Resident byte cost, de-duplicating buffers shared within this block.
    pub fn allocated_bytes(&self) -> usize {
        let mut seen = HashSet::new();
        let mut total = 0usize;
        for column in &self.columns {
            total = total.saturating_add(array_data_bytes(&column.values().to_data(), &mut seen));
        }
        total
    }
}

fn array_data_bytes(data: &arrow::array::ArrayData, seen: &mut HashSet<usize>) -> usize {
    let mut total = 0usize;
    for buffer in data.buffers() {
        total = total.saturating_add(buffer_bytes(buffer, seen));
    }
    if let Some(nulls) = data.nulls() {
        total = total.saturating_add(buffer_bytes(nulls.buffer(), seen));
    }
    for child in data.child_data() {
        total = total.saturating_add(array_data_bytes(child, seen));
    }
    total
}

fn buffer_bytes(buffer: &Buffer, seen: &mut HashSet<usize>) -> usize {
    let ptr = buffer.data_ptr().as_ptr() as usize;
    if !seen.insert(ptr) {
        return 0;
    }
    buffer.capacity().max(buffer.len())
}

/// Builds a block from `(field, column)` pairs, inferring the schema.
pub fn block_from_columns(
    fields: Vec<FieldRef>,
    columns: Vec<BlockColumn>,
    rows: usize,
) -> Result<Block, String> {
    let schema = Arc::new(Schema::new(fields));
    Block::try_new(schema, columns, rows)
}
