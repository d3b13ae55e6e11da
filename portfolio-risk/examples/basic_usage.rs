//! Example usage of the Risk Gate

use chrono::{Duration, Utc};
use common::{OrderSide, OrderSize, StrategyProposal};
use portfolio_risk::{CircuitBreakerConfig, Portfolio, RiskConfig, RiskGate, RiskLimits};
use rust_decimal_macros::dec;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== Risk Gate Example ===\n");

    let config = RiskConfig {
        risk_limits: RiskLimits {
            max_position_pct: 0.30,
            max_risk_per_trade_pct: 0.05,
            ..Default::default()
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            cooldown_secs: 60,
            ..Default::default()
        },
    };
    config.validate()?;

    let gate = RiskGate::new(config);
    let portfolio = Portfolio::new(dec!(10000));
    let now = Utc::now();

    println!("Example 1: Proposal within limits");
    let small = StrategyProposal::new("dca", "BTC", OrderSide::Buy, OrderSize::Notional(dec!(300)), dec!(30000));
    match gate.admit(&small, &portfolio, now).await {
        Ok(permit) => {
            println!("  approved (trial: {})", permit.is_trial());
            gate.record_execution(permit, true, now).await;
        }
        Err(rejection) => println!("  rejected: {}", rejection),
    }

    println!("\nExample 2: Proposal breaching the per-trade limit");
    let large = StrategyProposal::new("swing", "BTC", OrderSide::Buy, OrderSize::Notional(dec!(2500)), dec!(30000));
    if let Err(rejection) = gate.admit(&large, &portfolio, now).await {
        println!("  rejected: {}", rejection);
    }

    println!("\nExample 3: Repeated execution failures open the breaker");
    for i in 0..2 {
        let permit = gate.admit(&small, &portfolio, now).await?;
        if let Some(t) = gate.record_execution(permit, false, now + Duration::seconds(i)).await {
            println!("  breaker {} -> {}", t.from, t.to);
        }
    }
    println!("  state: {}", gate.breaker_state().await.state);

    let later = now + Duration::seconds(90);
    let trial = gate.admit(&small, &portfolio, later).await?;
    println!("  after cooldown, trial permit: {}", trial.is_trial());
    if let Some(t) = gate.record_execution(trial, true, later).await {
        println!("  breaker {} -> {}", t.from, t.to);
    }

    Ok(())
}
