//! Pricing command - prints per-call prices

use crate::domain::usage::PricingTable;

/// Print the pricing table with configured overrides applied
pub async fn run() -> anyhow::Result<()> {
    let config = super::bootstrap()?;

    let pricing = config.pricing_table()?;
    print!("{}", render(&pricing));
    Ok(())
}

fn render(pricing: &PricingTable) -> String {
    let mut out = format!("{:<24} {:<22} {:>10}\n", "CALL TYPE", "SERVICE", "USD/CALL");
    for entry in pricing.entries() {
        out.push_str(&format!(
            "{:<24} {:<22} {:>10.3}\n",
            entry.call_type.as_str(),
            entry.call_type.service(),
            entry.unit_cost()
        ));
    }
    out
}
