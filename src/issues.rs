//! Fixed taxonomy of policy issues scored by every interpretation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A policy domain. Variant order is the canonical rendering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IssueCategory {
    AgricultureAndFood,
    Education,
    Transportation,
    EconomicsAndCommerce,
    ForeignRelations,
    Government,
    Healthcare,
    Housing,
    Energy,
    Technology,
    Immigration,
    NationalDefense,
    CrimeAndLawEnforcement,
    WildlifeAndForestManagement,
    PublicLandsAndNaturalResources,
    EnvironmentalManagementAndClimateChange,
    OverallBenefitToSociety,
}

impl IssueCategory {
    pub const ALL: [IssueCategory; 17] = [
        IssueCategory::AgricultureAndFood,
        IssueCategory::Education,
        IssueCategory::Transportation,
        IssueCategory::EconomicsAndCommerce,
        IssueCategory::ForeignRelations,
        IssueCategory::Government,
        IssueCategory::Healthcare,
        IssueCategory::Housing,
        IssueCategory::Energy,
        IssueCategory::Technology,
        IssueCategory::Immigration,
        IssueCategory::NationalDefense,
        IssueCategory::CrimeAndLawEnforcement,
        IssueCategory::WildlifeAndForestManagement,
        IssueCategory::PublicLandsAndNaturalResources,
        IssueCategory::EnvironmentalManagementAndClimateChange,
        IssueCategory::OverallBenefitToSociety,
    ];

    /// The category every document-level interpretation must score.
    pub const OVERALL: IssueCategory = IssueCategory::OverallBenefitToSociety;

    /// Stable human-readable label. Used in prompts and matched by the parser.
    pub fn label(self) -> &'static str {
        match self {
            Self::AgricultureAndFood => "Agriculture and Food",
            Self::Education => "Education",
            Self::Transportation => "Transportation",
            Self::EconomicsAndCommerce => "Economics and Commerce",
            Self::ForeignRelations => "Foreign Relations",
            Self::Government => "Government Efficiency and Management",
            Self::Healthcare => "Healthcare",
            Self::Housing => "Housing",
            Self::Energy => "Energy",
            Self::Technology => "Technology",
            Self::Immigration => "Immigration And Border Security",
            Self::NationalDefense => "National Defense",
            Self::CrimeAndLawEnforcement => "Crime and Law Enforcement",
            Self::WildlifeAndForestManagement => "Wildlife and Forest Management",
            Self::PublicLandsAndNaturalResources => "Public Lands and Natural Resources",
            Self::EnvironmentalManagementAndClimateChange => {
                "Environmental Management and Climate Change"
            }
            Self::OverallBenefitToSociety => "Overall Benefit to Society",
        }
    }

    /// Case-insensitive label lookup.
    pub fn from_label(label: &str) -> Option<Self> {
        let needle = label.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.label().eq_ignore_ascii_case(needle))
    }

    pub fn is_overall(self) -> bool {
        self == Self::OVERALL
    }

    /// Categories other than the overall one, in canonical order.
    pub fn topical() -> impl Iterator<Item = IssueCategory> {
        Self::ALL.into_iter().filter(|c| !c.is_overall())
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
