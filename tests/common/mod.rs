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
//! Shared helpers for sorting stream tests.
#![allow(dead_code)]

use std::sync::Arc;

use arrow::array::{Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, FieldRef};

use blocksort::exec::block::{Block, BlockColumn, block_from_columns};
use blocksort::{BlockStream, MemoryBlockStream};

pub fn int_field(name: &str) -> FieldRef {
    Arc::new(Field::new(name, DataType::Int64, true))
}

pub fn int_block(values: Vec<i64>) -> Block {
    let rows = values.len();
    block_from_columns(
        vec![int_field("k")],
        vec![BlockColumn::Plain(Arc::new(Int64Array::from(values)))],
        rows,
    )
    .unwrap()
}

/// Block with a leading constant column `c` and a plain key column `k`.
pub fn const_and_key_block(constant: i64, keys: Vec<i64>) -> Block {
    let rows = keys.len();
    block_from_columns(
        vec![int_field("c"), int_field("k")],
        vec![
            BlockColumn::Const(Arc::new(Int64Array::from(vec![constant]))),
            BlockColumn::Plain(Arc::new(Int64Array::from(keys))),
        ],
        rows,
    )
    .unwrap()
}

/// Two-column block for prefix-sorted inputs: `(a, b)` rows.
pub fn pair_block(rows: Vec<(i64, i64)>) -> Block {
    let len = rows.len();
    let a: Vec<i64> = rows.iter().map(|(a, _)| *a).collect();
    let b: Vec<i64> = rows.iter().map(|(_, b)| *b).collect();
    block_from_columns(
        vec![int_field("a"), int_field("b")],
        vec![
            BlockColumn::Plain(Arc::new(Int64Array::from(a))),
            BlockColumn::Plain(Arc::new(Int64Array::from(b))),
        ],
        len,
    )
    .unwrap()
}

pub fn string_block(values: Vec<&str>) -> Block {
    let rows = values.len();
    block_from_columns(
        vec![Arc::new(Field::new("s", DataType::Utf8, true))],
        vec![BlockColumn::Plain(Arc::new(StringArray::from(values)))],
        rows,
    )
    .unwrap()
}

pub fn stream_of(blocks: Vec<Block>) -> Box<dyn BlockStream> {
    Box::new(MemoryBlockStream::from_blocks(blocks).unwrap())
}

pub fn int_column(block: &Block, index: usize) -> Vec<i64> {
    let values = block.materialized(index).unwrap();
    let values = values.as_any().downcast_ref::<Int64Array>().unwrap();
    (0..values.len()).map(|i| values.value(i)).collect()
}

pub fn string_column(block: &Block, index: usize) -> Vec<String> {
    let values = block.materialized(index).unwrap();
    let values = values.as_any().downcast_ref::<StringArray>().unwrap();
    (0..values.len()).map(|i| values.value(i).to_string()).collect()
}

/// Drains a stream, concatenating the values of one int column.
pub fn drain_int_column(stream: &mut dyn BlockStream, index: usize) -> Vec<i64> {
    let mut out = Vec::new();
    while let Some(block) = stream.read().unwrap() {
        out.extend(int_column(&block, index));
    }
    out
}

pub fn drain_blocks(stream: &mut dyn BlockStream) -> Vec<Block> {
    let mut out = Vec::new();
    while let Some(block) = stream.read().unwrap() {
        out.push(block);
    }
    out
}
