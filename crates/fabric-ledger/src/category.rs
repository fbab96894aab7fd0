/// Trust-point categories (spec.md §3, Trust transaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Compliance,
    Security,
    RiskManagement,
    Automation,
    Intelligence,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Compliance => "compliance",
            Category::Security => "security",
            Category::RiskManagement => "risk_management",
            Category::Automation => "automation",
            Category::Intelligence => "intelligence",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s {
            "compliance" => Some(Category::Compliance),
            "security" => Some(Category::Security),
            "risk_management" => Some(Category::RiskManagement),
            "automation" => Some(Category::Automation),
            "intelligence" => Some(Category::Intelligence),
            _ => None,
        }
    }

    pub const ALL: [Category; 5] = [
        Category::Compliance,
        Category::Security,
        Category::RiskManagement,
        Category::Automation,
        Category::Intelligence,
    ];
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
