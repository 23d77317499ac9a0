use serde::{Deserialize, Serialize};

// Dashboards and agents share one inbound event set; they are told apart
// only by which events they send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Register(RegisterPayload),
    ReportProfiles(ReportProfilesPayload),
    TradeCommand(TradeCommandPayload),
    AlertSet(AlertSetPayload),
    SubscribeSymbol(SubscribeSymbolPayload),
    StartProfileOnAgent(StartProfilePayload),
    AgentLog(AgentLogPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    UpdateAgents(Vec<AgentInfo>),
    TickData(TickPayload),
    PriceAlert(DataPayload),
    LogMessage(DataPayload),
    StartProfile(StartProfilePayload),
}

impl ServerEvent {
    // Non-fatal hub errors all surface as one broadcast log line.
    pub fn log(data: impl Into<String>) -> Self {
        Self::LogMessage(DataPayload { data: data.into() })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterPayload {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportProfilesPayload {
    pub agent: String,
    #[serde(default)]
    pub profiles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeCommandPayload {
    #[serde(rename = "type")]
    pub order_type: String,
    pub symbol: String,
    pub volume: f64,
    pub sl: f64,
    pub tp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertSetPayload {
    pub symbol: String,
    pub condition: String,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeSymbolPayload {
    pub symbol: String,
}

// Shared by start_profile_on_agent (front-end to hub) and start_profile
// (hub to the targeted agent).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartProfilePayload {
    pub agent: String,
    pub profile: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentLogPayload {
    pub agent: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataPayload {
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickPayload {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentInfo {
    pub name: String,
    #[serde(default)]
    pub profiles: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_event_uses_type_and_data_tags() {
        let event = ClientEvent::Register(RegisterPayload {
            name: "Windows-Trading-PC-01".to_string(),
        });
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            value,
            json!({"type": "register", "data": {"name": "Windows-Trading-PC-01"}})
        );
    }

    #[test]
    fn trade_command_round_trips_with_renamed_type_field() {
        let raw = r#"{
            "type": "trade_command",
            "data": {"type": "BUY", "symbol": "EURUSD", "volume": 0.1, "sl": 1.0, "tp": 1.2}
        }"#;
        let event: ClientEvent = serde_json::from_str(raw).expect("parse");
        assert_eq!(
            event,
            ClientEvent::TradeCommand(TradeCommandPayload {
                order_type: "BUY".to_string(),
                symbol: "EURUSD".to_string(),
                volume: 0.1,
                sl: 1.0,
                tp: 1.2,
            })
        );
        let back = serde_json::to_value(&event).expect("serialize");
        assert_eq!(back["data"]["type"], json!("BUY"));
    }

    #[test]
    fn update_agents_carries_the_snapshot_list() {
        let event = ServerEvent::UpdateAgents(vec![AgentInfo {
            name: "pc-01".to_string(),
            profiles: vec!["scalper".to_string()],
        }]);
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            value,
            json!({"type": "update_agents", "data": [{"name": "pc-01", "profiles": ["scalper"]}]})
        );
    }

    #[test]
    fn missing_profiles_field_defaults_to_empty() {
        let raw = r#"{"type": "report_profiles", "data": {"agent": "pc-01"}}"#;
        let event: ClientEvent = serde_json::from_str(raw).expect("parse");
        assert_eq!(
            event,
            ClientEvent::ReportProfiles(ReportProfilesPayload {
                agent: "pc-01".to_string(),
                profiles: Vec::new(),
            })
        );
    }
}
