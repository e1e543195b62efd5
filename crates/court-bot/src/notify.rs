//! Telegram notifications.
//!
//! Every send is fire-and-forget: failures are logged and swallowed so a
//! notification outage can never affect trading. Outbound text escapes
//! Markdown-special characters before leaving the process.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::config::TelegramConfig;
use crate::settlement::SettleSummary;
use crate::store::RiskLevel;

/// Telegram sender. Disabled configurations turn every send into a no-op.
pub struct Notifier {
    config: TelegramConfig,
    http: Option<reqwest::Client>,
}

impl Notifier {
    pub fn new(config: TelegramConfig) -> Self {
        let http = if config.is_configured() {
            reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .ok()
        } else {
            None
        };
        Self { config, http }
    }

    /// A disabled notifier for tests and dry runs.
    pub fn disabled() -> Self {
        Self::new(TelegramConfig::default())
    }

    /// Send raw Markdown text. Never errors.
    pub async fn send(&self, text: &str) {
        let Some(http) = &self.http else {
            debug!("Telegram not configured, dropping notification");
            return;
        };
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.config.bot_token
        );
        let body = serde_json::json!({
            "chat_id": self.config.chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        match http.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!(status = %resp.status(), "Telegram send rejected"),
            Err(e) => warn!(error = %e, "Telegram send failed"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn notify_trade(
        &self,
        outcome: &str,
        event_slug: &str,
        order_price: Decimal,
        best_ask: Decimal,
        size_usd: Decimal,
        edge_pct: Decimal,
        dca_seq: u32,
        dca_max: u32,
    ) {
        self.send(&format!(
            "*Entry* {} ({})\nBUY @ {:.3} (ask {:.3}) ${:.0}\nedge {:.1}% | DCA {}/{}",
            escape_md(outcome),
            escape_md(event_slug),
            order_price,
            best_ask,
            size_usd,
            edge_pct,
            dca_seq,
            dca_max,
        ))
        .await;
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn notify_hedge(
        &self,
        outcome: &str,
        event_slug: &str,
        order_price: Decimal,
        best_ask: Decimal,
        size_usd: Decimal,
        dir_vwap: Decimal,
        combined: Decimal,
    ) {
        self.send(&format!(
            "*Hedge* {} ({})\nBUY @ {:.3} (ask {:.3}) ${:.0}\ndir vwap {:.3} | combined {:.4}",
            escape_md(outcome),
            escape_md(event_slug),
            order_price,
            best_ask,
            size_usd,
            dir_vwap,
            combined,
        ))
        .await;
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn notify_dca(
        &self,
        outcome: &str,
        event_slug: &str,
        order_price: Decimal,
        size_usd: Decimal,
        vwap: Decimal,
        dca_seq: u32,
        dca_max: u32,
        trigger: &str,
    ) {
        self.send(&format!(
            "*DCA* {} ({}) {}/{}\nBUY @ {:.3} ${:.0} | vwap {:.3} | {}",
            escape_md(outcome),
            escape_md(event_slug),
            dca_seq,
            dca_max,
            order_price,
            size_usd,
            vwap,
            escape_md(trigger),
        ))
        .await;
    }

    pub async fn notify_merge(
        &self,
        event_slug: &str,
        shares: Decimal,
        combined_vwap: Decimal,
        net_profit: Decimal,
    ) {
        self.send(&format!(
            "*Merge* {}\n{:.2} pairs @ combined {:.4}\nnet {}",
            escape_md(event_slug),
            shares,
            combined_vwap,
            fmt_signed(net_profit),
        ))
        .await;
    }

    pub async fn notify_order_filled(
        &self,
        event_slug: &str,
        outcome: &str,
        fill_price: Decimal,
        signal_id: i64,
    ) {
        self.send(&format!(
            "*Filled* #{} {} ({}) @ {:.3}",
            signal_id,
            escape_md(outcome),
            escape_md(event_slug),
            fill_price,
        ))
        .await;
    }

    pub async fn notify_order_replaced(
        &self,
        event_slug: &str,
        outcome: &str,
        old_price: Decimal,
        new_price: Decimal,
        replace_count: u32,
        max_replaces: u32,
    ) {
        self.send(&format!(
            "*Repriced* {} ({})\n{:.3} -> {:.3} ({}/{})",
            escape_md(outcome),
            escape_md(event_slug),
            old_price,
            new_price,
            replace_count,
            max_replaces,
        ))
        .await;
    }

    pub async fn notify_risk_transition(
        &self,
        from: Option<RiskLevel>,
        to: RiskLevel,
        trigger: &str,
    ) {
        let from = from.map(|l| l.as_str()).unwrap_or("NONE");
        self.send(&format!(
            "*Circuit Breaker* {} -> {}\n{}",
            from,
            to.as_str(),
            escape_md(trigger),
        ))
        .await;
    }

    pub async fn notify_settlement(&self, summary: &SettleSummary) {
        let mut lines = vec![format!(
            "*Settled* {} | W/L {}/{} | PnL {}",
            summary.settled.len(),
            summary.wins(),
            summary.losses(),
            fmt_signed(summary.total_pnl()),
        )];
        for s in &summary.settled {
            lines.push(format!(
                "  #{} {} {} {}",
                s.signal_id,
                escape_md(&s.team),
                if s.won { "WIN" } else { "LOSS" },
                fmt_signed(s.pnl),
            ));
        }
        if summary.postponed > 0 {
            lines.push(format!("  postponed: {}", summary.postponed));
        }
        self.send(&lines.join("\n")).await;
    }
}

/// Escape Telegram Markdown-special characters in dynamic text.
pub fn escape_md(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn fmt_signed(v: Decimal) -> String {
    if v >= Decimal::ZERO {
        format!("+${:.2}", v)
    } else {
        format!("-${:.2}", v.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_escape_md() {
        assert_eq!(escape_md("nba-bos-lal"), "nba-bos-lal");
        assert_eq!(escape_md("under_score"), "under\\_score");
        assert_eq!(escape_md("a*b`c[d]"), "a\\*b\\`c\\[d\\]");
        assert_eq!(escape_md(""), "");
    }

    #[test]
    fn test_fmt_signed() {
        assert_eq!(fmt_signed(dec!(3.5)), "+$3.50");
        assert_eq!(fmt_signed(dec!(-94)), "-$94.00");
        assert_eq!(fmt_signed(dec!(0)), "+$0.00");
    }

    #[tokio::test]
    async fn test_disabled_notifier_is_silent_noop() {
        let n = Notifier::disabled();
        // Must not panic or block.
        n.send("hello").await;
        n.notify_risk_transition(None, RiskLevel::Yellow, "test").await;
    }
}
