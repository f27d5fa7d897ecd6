// SPDX-License-Identifier: MIT

pub mod chainflow;
pub mod runtime;
