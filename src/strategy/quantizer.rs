//! Order quantity and price normalization.

use crate::exchange::{OrderBook, OrderSide, RecentTrade, SymbolRules};
use crate::utils::decimal::{floor_to_step, mean};
use rust_decimal::Decimal;

/// Floor a raw quantity and price to the pair's lot step and price tick.
///
/// Neither value is ever rounded up.
pub fn quantize(raw_qty: Decimal, raw_price: Decimal, rules: &SymbolRules) -> (Decimal, Decimal) {
    (
        floor_to_step(raw_qty, rules.step_size),
        floor_to_step(raw_price, rules.tick_size),
    )
}

/// Pick a limit price from the top of the book and the recent trade mean.
///
/// BUY takes the trade mean when it sits below the ask and falls back to the
/// bid. SELL takes the mean when it sits above the bid and falls back to the
/// ask. Returns `None` when the book side needed is empty.
pub fn limit_price(side: OrderSide, book: &OrderBook, trades: &[RecentTrade]) -> Option<Decimal> {
    let bid = book.best_bid()?;
    let ask = book.best_ask()?;

    if trades.is_empty() {
        return Some(match side {
            OrderSide::Buy => bid,
            OrderSide::Sell => ask,
        });
    }

    let prices: Vec<Decimal> = trades.iter().map(|t| t.price).collect();
    let avg = mean(&prices);

    Some(match side {
        OrderSide::Buy if avg < ask => avg,
        OrderSide::Buy => bid,
        OrderSide::Sell if avg > bid => avg,
        OrderSide::Sell => ask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::BookLevel;
    use rust_decimal_macros::dec;

    fn rules(step: Decimal, tick: Decimal) -> SymbolRules {
        SymbolRules::new("ETHUSDT", step, tick)
    }

    fn book(bid: Decimal, ask: Decimal) -> OrderBook {
        OrderBook {
            bids: vec![BookLevel {
                price: bid,
                qty: dec!(1),
            }],
            asks: vec![BookLevel {
                price: ask,
                qty: dec!(1),
            }],
        }
    }

    fn trades(prices: &[Decimal]) -> Vec<RecentTrade> {
        prices
            .iter()
            .map(|&price| RecentTrade {
                price,
                qty: dec!(1),
                time: 0,
                is_buyer_maker: false,
            })
            .collect()
    }

    #[test]
    fn test_quantize_floors_to_multiples() {
        let cases = [
            (dec!(1.23456789), dec!(2017.987), dec!(0.001), dec!(0.01)),
            (dec!(0.0999), dec!(0.123456), dec!(0.01), dec!(0.0001)),
            (dec!(15), dec!(99.99), dec!(1), dec!(0.1)),
            (dec!(0.00000999), dec!(1), dec!(0.00001), dec!(1)),
        ];

        for (qty, price, step, tick) in cases {
            let (q, p) = quantize(qty, price, &rules(step, tick));
            assert!(q <= qty && p <= price, "{} {} -> {} {}", qty, price, q, p);
            assert!((q % step).is_zero(), "{} not a multiple of {}", q, step);
            assert!((p % tick).is_zero(), "{} not a multiple of {}", p, tick);
        }
    }

    #[test]
    fn test_quantize_formats_to_step_precision() {
        let (q, p) = quantize(dec!(1.5), dec!(2000), &rules(dec!(0.00100000), dec!(0.01000000)));
        assert_eq!(q.to_string(), "1.500");
        assert_eq!(p.to_string(), "2000.00");
    }

    #[test]
    fn test_buy_prefers_mean_below_ask() {
        let price = limit_price(
            OrderSide::Buy,
            &book(dec!(99), dec!(101)),
            &trades(&[dec!(100), dec!(100.5)]),
        );
        assert_eq!(price, Some(dec!(100.25)));
    }

    #[test]
    fn test_buy_falls_back_to_bid() {
        let price = limit_price(
            OrderSide::Buy,
            &book(dec!(99), dec!(101)),
            &trades(&[dec!(102)]),
        );
        assert_eq!(price, Some(dec!(99)));
    }

    #[test]
    fn test_sell_prefers_mean_above_bid() {
        let price = limit_price(
            OrderSide::Sell,
            &book(dec!(99), dec!(101)),
            &trades(&[dec!(100)]),
        );
        assert_eq!(price, Some(dec!(100)));
    }

    #[test]
    fn test_sell_falls_back_to_ask() {
        let price = limit_price(
            OrderSide::Sell,
            &book(dec!(99), dec!(101)),
            &trades(&[dec!(98)]),
        );
        assert_eq!(price, Some(dec!(101)));
    }

    #[test]
    fn test_empty_book_has_no_price() {
        assert_eq!(
            limit_price(OrderSide::Buy, &OrderBook::default(), &trades(&[dec!(1)])),
            None
        );
    }
}
