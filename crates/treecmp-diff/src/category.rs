//! The eight result categories.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a path ends up after comparison. Every observed path lands in
/// exactly one category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "ld")]
    LeftDirs,
    #[serde(rename = "lf")]
    LeftFiles,
    #[serde(rename = "rd")]
    RightDirs,
    #[serde(rename = "rf")]
    RightFiles,
    #[serde(rename = "cd")]
    CommonDirs,
    #[serde(rename = "cf")]
    CommonFiles,
    #[serde(rename = "diff")]
    Different,
    #[serde(rename = "funny")]
    Funny,
}

impl Category {
    /// All categories in rendering order.
    pub const ALL: [Category; 8] = [
        Category::LeftDirs,
        Category::LeftFiles,
        Category::RightDirs,
        Category::RightFiles,
        Category::CommonDirs,
        Category::CommonFiles,
        Category::Different,
        Category::Funny,
    ];

    /// Short keyword used by test harnesses (`ld`, `cf`, `diff`, ...).
    pub fn name(self) -> &'static str {
        match self {
            Category::LeftDirs => "ld",
            Category::LeftFiles => "lf",
            Category::RightDirs => "rd",
            Category::RightFiles => "rf",
            Category::CommonDirs => "cd",
            Category::CommonFiles => "cf",
            Category::Different => "diff",
            Category::Funny => "funny",
        }
    }

    /// Look a category up by its short keyword.
    pub fn from_name(name: &str) -> Option<Self> {
        Category::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Human readable label.
    pub fn label(self) -> &'static str {
        match self {
            Category::LeftDirs => "left-only dirs",
            Category::LeftFiles => "left-only files",
            Category::RightDirs => "right-only dirs",
            Category::RightFiles => "right-only files",
            Category::CommonDirs => "common dirs",
            Category::CommonFiles => "common files",
            Category::Different => "different files",
            Category::Funny => "funny",
        }
    }

    /// Whether a path in this category exists on only one side.
    pub fn is_one_sided(self) -> bool {
        matches!(
            self,
            Category::LeftDirs | Category::LeftFiles | Category::RightDirs | Category::RightFiles
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
