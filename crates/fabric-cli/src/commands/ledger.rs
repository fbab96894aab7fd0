// Inspect an entity's trust balance.

use anyhow::Result;
use fabric_ledger::TrustLedger;
use serde_json::json;

use crate::output::{print_field, OutputFormat};

pub async fn run(ledger: &TrustLedger, output: OutputFormat, entity_id: &str) -> Result<()> {
    let balance = ledger.get_balance(entity_id);

    if output.is_text() {
        print_field("entity", entity_id);
        print_field("total", &balance.total.to_string());
        print_field("tier", &balance.tier.to_string());
        for (category, points) in &balance.breakdown {
            println!("  {:<16} {points}", category.as_str());
        }
    } else {
        let breakdown: serde_json::Map<String, serde_json::Value> = balance
            .breakdown
            .iter()
            .map(|(category, points)| (category.as_str().to_string(), json!(points)))
            .collect();
        output.print_value(&json!({
            "entity_id": entity_id,
            "total": balance.total,
            "tier": balance.tier.to_string(),
            "breakdown": breakdown,
        }));
    }
    Ok(())
}
