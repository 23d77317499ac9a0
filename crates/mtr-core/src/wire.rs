use thiserror::Error;

pub const FIELD_DELIMITER: char = '|';

// Minimum field count for a TICK|DATA|symbol|bid|ask frame.
const TICK_FIELDS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Tick {
        symbol: String,
        bid: f64,
        ask: f64,
    },
    Alert {
        raw: String,
    },
    Log {
        raw: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    TradeOrder {
        order_type: String,
        symbol: String,
        volume: f64,
        sl: f64,
        tp: f64,
    },
    AlertRule {
        symbol: String,
        condition: String,
        price: f64,
    },
    Subscribe {
        symbol: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("tick frame has {got} fields, expected at least {TICK_FIELDS}")]
    TickFieldCount { got: usize },
    #[error("tick frame field '{field}' is not a finite number: '{value}'")]
    BadNumber { field: &'static str, value: String },
}

// The first field selects the variant; anything but a TICK or ALERT topic
// is a log line and never fails.
pub fn decode_frame(raw: &str) -> Result<InboundEvent, WireError> {
    let parts: Vec<&str> = raw.split(FIELD_DELIMITER).collect();
    match parts[0] {
        "TICK" => {
            if parts.len() < TICK_FIELDS {
                return Err(WireError::TickFieldCount { got: parts.len() });
            }
            Ok(InboundEvent::Tick {
                symbol: parts[2].to_string(),
                bid: parse_price("bid", parts[3])?,
                ask: parse_price("ask", parts[4])?,
            })
        }
        "ALERT" => Ok(InboundEvent::Alert {
            raw: raw.to_string(),
        }),
        _ => Ok(InboundEvent::Log {
            raw: raw.to_string(),
        }),
    }
}

// Numeric fields render through f64 Display, so 1.0 becomes 1. Field
// values are not escaped; the bridge has the same limitation.
pub fn encode_command(command: &Command) -> String {
    match command {
        Command::TradeOrder {
            order_type,
            symbol,
            volume,
            sl,
            tp,
        } => format!("TRADE|OPEN|{order_type}|{symbol}|{volume}|{sl}|{tp}"),
        Command::AlertRule {
            symbol,
            condition,
            price,
        } => format!("ALERT|SET|{symbol}|{condition}|{price}"),
        Command::Subscribe { symbol } => format!("TICK|SUBSCRIBE|{symbol}"),
    }
}

fn parse_price(field: &'static str, value: &str) -> Result<f64, WireError> {
    match value.trim().parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Ok(parsed),
        _ => Err(WireError::BadNumber {
            field,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tick_frame() {
        let event = decode_frame("TICK|DATA|EURUSD|1.1000|1.1002").expect("decode tick");
        assert_eq!(
            event,
            InboundEvent::Tick {
                symbol: "EURUSD".to_string(),
                bid: 1.1000,
                ask: 1.1002,
            }
        );
    }

    #[test]
    fn decodes_alert_frame_with_full_raw_text() {
        let raw = "ALERT|TRIGGERED|EURUSD crossed 1.1000";
        let event = decode_frame(raw).expect("decode alert");
        assert_eq!(
            event,
            InboundEvent::Alert {
                raw: raw.to_string()
            }
        );
    }

    #[test]
    fn unknown_topic_decodes_as_log() {
        let event = decode_frame("HELLO|from the bridge").expect("decode log");
        assert_eq!(
            event,
            InboundEvent::Log {
                raw: "HELLO|from the bridge".to_string()
            }
        );
    }

    #[test]
    fn tick_with_malformed_number_is_rejected() {
        let err = decode_frame("TICK|DATA|EURUSD|abc|1.1002").expect_err("bad bid");
        assert_eq!(
            err,
            WireError::BadNumber {
                field: "bid",
                value: "abc".to_string()
            }
        );
    }

    #[test]
    fn tick_with_nan_field_is_rejected() {
        let err = decode_frame("TICK|DATA|EURUSD|NaN|1.1002").expect_err("nan bid");
        assert!(matches!(err, WireError::BadNumber { field: "bid", .. }));
    }

    #[test]
    fn tick_with_too_few_fields_is_rejected() {
        let err = decode_frame("TICK|DATA|EURUSD").expect_err("short tick");
        assert_eq!(err, WireError::TickFieldCount { got: 3 });
    }

    #[test]
    fn encodes_trade_order_in_fixed_field_order() {
        let command = Command::TradeOrder {
            order_type: "BUY".to_string(),
            symbol: "EURUSD".to_string(),
            volume: 0.1,
            sl: 1.0,
            tp: 1.2,
        };
        assert_eq!(encode_command(&command), "TRADE|OPEN|BUY|EURUSD|0.1|1|1.2");
    }

    #[test]
    fn encodes_alert_rule() {
        let command = Command::AlertRule {
            symbol: "GBPUSD".to_string(),
            condition: "ABOVE".to_string(),
            price: 1.25,
        };
        assert_eq!(encode_command(&command), "ALERT|SET|GBPUSD|ABOVE|1.25");
    }

    #[test]
    fn encodes_subscription() {
        let command = Command::Subscribe {
            symbol: "USDJPY".to_string(),
        };
        assert_eq!(encode_command(&command), "TICK|SUBSCRIBE|USDJPY");
    }
}
