// Copyright 2024 FastLabs Developers
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

//! The source of "now" for backup names and backup ages.

use jiff::Zoned;

/// Where rotations and cleanups read the current time from.
#[derive(Debug)]
pub(crate) enum Clock {
    /// The system clock, in the system time zone.
    System,
    /// A fixed time that tests move by hand.
    #[cfg(test)]
    Manual(Zoned),
}

impl Clock {
    pub(crate) fn now(&self) -> Zoned {
        match self {
            Clock::System => Zoned::now(),
            #[cfg(test)]
            Clock::Manual(now) => now.clone(),
        }
    }
}
