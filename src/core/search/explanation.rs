// Copyright 2019 Zhizhesihai (Beijing) Technology Limited.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::Result;

/// Expert: Describes the score computation for document and query.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Explanation {
    is_match: bool,
    value: f32,
    description: String,
    details: Vec<Explanation>,
}

impl Explanation {
    pub fn new(
        is_match: bool,
        value: f32,
        description: String,
        details: Vec<Explanation>,
    ) -> Explanation {
        let value = if !is_match { 0.0f32 } else { value };

        Explanation {
            is_match,
            value,
            description,
            details,
        }
    }

    /// An explanation for a doc the query does not match.
    pub fn no_match(description: String) -> Explanation {
        Explanation::new(false, 0.0, description, vec![])
    }

    pub fn is_match(&self) -> bool {
        self.is_match
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn summary(&self) -> String {
        format!("{} = {}", self.value, self.description)
    }

    pub fn details(&self) -> &[Explanation] {
        self.details.as_ref()
    }

    /// Renders the explanation tree, indenting each level by two spaces.
    pub fn to_string(&self, depth: i32) -> String {
        let mut buffer = String::new();

        for _ in 0..depth {
            buffer.push_str("  ");
        }

        buffer.push_str(&self.summary());
        buffer.push_str("\n");

        for detail in &self.details {
            buffer.push_str(&detail.to_string(depth + 1))
        }

        buffer
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explanation_tree() {
        let expl = Explanation::new(
            true,
            2.0,
            "sum of:".to_string(),
            vec![
                Explanation::new(true, 1.5, "a".to_string(), vec![]),
                Explanation::new(true, 0.5, "b".to_string(), vec![]),
            ],
        );
        assert_eq!(expl.to_string(0), "2 = sum of:\n  1.5 = a\n  0.5 = b\n");

        let missing = Explanation::new(false, 3.0, "no".to_string(), vec![]);
        assert!((missing.value() - 0.0).abs() < ::std::f32::EPSILON);

        let json = expl.to_json().unwrap();
        let back: Explanation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.details().len(), 2);
        assert_eq!(back.description(), "sum of:");
    }
}
