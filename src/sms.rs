// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Outbound SMS helpers: segmentation and reply templates.

/// Longest body that fits a single SMS.
pub const SINGLE_SEGMENT_LIMIT: usize = 160;

/// Payload per segment once the concatenation header is added.
pub const MULTIPART_SEGMENT_LIMIT: usize = 153;

/// Splits a message into SMS segments.
///
/// Messages up to 160 characters go out whole; longer ones are cut into
/// 153-character parts. Counting is by `char`, never splitting a code point.
pub fn segments(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= SINGLE_SEGMENT_LIMIT {
        return vec![text.to_string()];
    }
    chars
        .chunks(MULTIPART_SEGMENT_LIMIT)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Fills `{name}`, `{amount}` and `{offer}` in a reply template.
pub fn render(template: &str, name: &str, amount: i64, offer: &str) -> String {
    let name = if name.is_empty() { "customer" } else { name };
    template
        .replace("{name}", name)
        .replace("{amount}", &amount.to_string())
        .replace("{offer}", offer)
}
