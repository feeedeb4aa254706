//! Unit tests for the scheduler's interval conversion

use coindeck::core::scheduler::cron_expression;
use cron::Schedule;
use std::str::FromStr;

#[test]
fn sub_minute_intervals_use_second_steps() {
    assert_eq!(cron_expression(15), "*/15 * * * * *");
}

#[test]
fn minute_and_above_intervals_use_minute_steps() {
    assert_eq!(cron_expression(60), "0 */1 * * * *");
    assert_eq!(cron_expression(300), "0 */5 * * * *");
}

#[test]
fn generated_expressions_parse() {
    for interval in [1, 15, 59, 60, 90, 300, 3600] {
        let expr = cron_expression(interval);
        assert!(
            Schedule::from_str(&expr).is_ok(),
            "expression '{}' should parse",
            expr
        );
    }
}
