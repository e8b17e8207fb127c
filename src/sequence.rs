// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;
use std::ops::AddAssign;
use std::ops::Sub;

/// A 32-bit TCP sequence number.
///
/// Sequence numbers wrap around at 2^32. Two numbers are ordered by the sign
/// of their 32-bit difference (RFC 1982 serial number arithmetic), so that
/// `0x0000_0010` is greater than `0xffff_fff0`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SequenceNumber32(u32);

impl SequenceNumber32 {
    pub const fn new(v: u32) -> Self {
        SequenceNumber32(v)
    }

    /// Return the raw sequence value.
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for SequenceNumber32 {
    fn from(v: u32) -> Self {
        SequenceNumber32(v)
    }
}

impl Add<u32> for SequenceNumber32 {
    type Output = SequenceNumber32;

    fn add(self, rhs: u32) -> Self::Output {
        SequenceNumber32(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for SequenceNumber32 {
    fn add_assign(&mut self, rhs: u32) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

/// Distance in bytes from `rhs` forward to `self`.
impl Sub for SequenceNumber32 {
    type Output = u32;

    fn sub(self, rhs: SequenceNumber32) -> Self::Output {
        self.0.wrapping_sub(rhs.0)
    }
}

impl PartialOrd for SequenceNumber32 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SequenceNumber32 {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.0.wrapping_sub(other.0) as i32).cmp(&0)
    }
}

impl fmt::Debug for SequenceNumber32 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SequenceNumber32 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
