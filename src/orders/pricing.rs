use rust_decimal::Decimal;

use super::model::OrderLine;

/// Current product price times quantity.
pub fn item_subtotal(line: &OrderLine) -> Decimal {
    line.product_price * Decimal::from(line.quantity)
}

/// Sum of subtotals; zero for an empty order.
pub fn order_total(lines: &[OrderLine]) -> Decimal {
    lines.iter().map(item_subtotal).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(price: Decimal, quantity: i32) -> OrderLine {
        OrderLine {
            product_id: 1,
            product_name: "p".into(),
            product_price: price,
            quantity,
        }
    }

    #[test]
    fn subtotal_is_price_times_quantity() {
        assert_eq!(item_subtotal(&line(Decimal::new(1000, 2), 2)), Decimal::new(2000, 2));
    }

    #[test]
    fn empty_order_totals_zero() {
        assert_eq!(order_total(&[]), Decimal::ZERO);
    }

    #[test]
    fn total_sums_all_lines() {
        let lines = [
            line(Decimal::new(1000, 2), 2),
            line(Decimal::new(500, 2), 1),
        ];
        assert_eq!(order_total(&lines), Decimal::new(2500, 2));
    }

    #[test]
    fn decimal_math_does_not_drift() {
        let lines = [line(Decimal::new(10, 2), 3), line(Decimal::new(20, 2), 1)];
        assert_eq!(order_total(&lines), Decimal::new(50, 2));
    }

    #[test]
    fn totals_exceed_the_price_column_bound() {
        // the largest price NUMERIC(10, 2) allows, on two big lines
        let max_price = Decimal::new(9_999_999_999, 2);
        let lines = [line(max_price, i32::MAX), line(max_price, 1)];
        let expected = max_price * Decimal::from(i64::from(i32::MAX) + 1);
        assert_eq!(order_total(&lines), expected);
        assert!(order_total(&lines) >= Decimal::from(100_000_000_i64));
    }
}
