//! Estimate command - prices a search plan before it runs

use clap::Args;

use crate::domain::usage::{micros_to_usd, CostEstimate, SearchPlan};

/// Arguments for the estimate command
#[derive(Args, Clone)]
pub struct EstimateArgs {
    /// Locations searched (one nearby search each)
    #[arg(long, default_value_t = 50)]
    pub locations: u32,

    /// Places fetched per location (one details call each)
    #[arg(long, default_value_t = 20)]
    pub places_per_location: u32,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// Print the estimated cost of a search
pub async fn run(args: EstimateArgs) -> anyhow::Result<()> {
    let config = super::bootstrap()?;

    let plan = SearchPlan {
        locations: args.locations,
        places_per_location: args.places_per_location,
    };
    let estimate = config.pricing_table()?.estimate(&plan)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&estimate)?);
    } else {
        print!("{}", render(&plan, &estimate, config.billing.free_tier_usd));
    }
    Ok(())
}

fn render(plan: &SearchPlan, estimate: &CostEstimate, free_tier_usd: f64) -> String {
    let mut out = format!(
        "Search plan: {} locations x {} places\n",
        plan.locations, plan.places_per_location
    );
    out.push_str(&format!(
        "  nearby searches: {:>6} calls  ${:.2}\n",
        estimate.nearby_search_calls,
        micros_to_usd(estimate.nearby_search_cost_micros)
    ));
    out.push_str(&format!(
        "  place details:   {:>6} calls  ${:.2}\n",
        estimate.place_details_calls,
        micros_to_usd(estimate.place_details_cost_micros)
    ));
    out.push_str(&format!(
        "  total:           {:>6} calls  ${:.2}\n",
        estimate.total_calls,
        estimate.total_cost()
    ));

    if estimate.total_cost_micros > 0 {
        let searches = (free_tier_usd / estimate.total_cost()).floor();
        out.push_str(&format!(
            "Free tier (${:.2}) covers {} such searches per month\n",
            free_tier_usd, searches
        ));
    }
    out
}
