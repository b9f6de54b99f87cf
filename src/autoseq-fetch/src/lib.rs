// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! HTTP data source for the `DataUpdate` stage.

pub mod fetcher;
pub mod step;

pub use fetcher::{fold_keys, FetchError, JsonFetcher, DEFAULT_TIMEOUT};
pub use step::FetchDataUpdateStep;
