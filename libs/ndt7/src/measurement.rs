//! wire types for the NDT7 measurement JSON frames
//!
//! Field names and casing match the [ndt7 protocol
//! spec](https://github.com/m-lab/ndt-server/blob/master/spec/ndt7-protocol.md)
//! exactly; this is wire format, not idiomatic Rust naming.

use serde::{Deserialize, Serialize};

/// which side produced a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// measurement computed by the client
    Client,
    /// measurement reported by the server
    Server,
}

/// which direction of the test a measurement belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Test {
    /// server-to-client bulk transfer
    Download,
    /// client-to-server bulk transfer
    Upload,
}

impl Test {
    /// the opposite test name
    pub fn reversed(self) -> Self {
        match self {
            Test::Download => Test::Upload,
            Test::Upload => Test::Download,
        }
    }
}

/// which role a session endpoint is playing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// the side that initiated the WebSocket connection
    Client,
    /// the side that accepted the WebSocket connection
    Server,
}

impl Role {
    /// the opposite role
    pub fn reversed(self) -> Self {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

/// application-level throughput counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    /// microseconds elapsed since the start of the test
    #[serde(rename = "ElapsedTime")]
    pub elapsed_time: i64,
    /// total bytes transferred (sent or received) so far
    #[serde(rename = "NumBytes")]
    pub num_bytes: i64,
    /// per-field change since the previous measurement in the group,
    /// attached by the statistics aggregator -- absent on the wire
    #[serde(rename = "Delta", skip_serializing_if = "Option::is_none", default)]
    pub delta: Option<AppInfoDelta>,
    /// per-field rate of change since the previous measurement,
    /// attached by the statistics aggregator -- absent on the wire
    #[serde(rename = "Rate", skip_serializing_if = "Option::is_none", default)]
    pub rate: Option<AppInfoRate>,
}

/// `AppInfo` field deltas between two measurements in a window group
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AppInfoDelta {
    /// elapsed-time delta, in microseconds
    #[serde(rename = "ElapsedTime")]
    pub elapsed_time: i64,
    /// byte-count delta
    #[serde(rename = "NumBytes")]
    pub num_bytes: i64,
}

/// `AppInfo` field rates, bytes/second
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AppInfoRate {
    /// bytes/second over the delta window
    #[serde(rename = "NumBytes")]
    pub num_bytes: f64,
}

/// endpoint addresses for a server-role measurement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// client endpoint, `ip:port` (bracketed for IPv6)
    #[serde(rename = "Client")]
    pub client: String,
    /// server endpoint, `ip:port` (bracketed for IPv6)
    #[serde(rename = "Server")]
    pub server: String,
}

/// the subset of kernel `TCP_INFO` counters reported per measurement
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TCPInfo {
    /// microseconds spent actively sending with a non-empty write queue
    #[serde(rename = "BusyTime", skip_serializing_if = "Option::is_none", default)]
    pub busy_time: Option<i64>,
    /// bytes for which an ACK has been received
    #[serde(rename = "BytesAcked", skip_serializing_if = "Option::is_none", default)]
    pub bytes_acked: Option<i64>,
    /// bytes for which an ACK has been sent
    #[serde(rename = "BytesReceived", skip_serializing_if = "Option::is_none", default)]
    pub bytes_received: Option<i64>,
    /// bytes transmitted or retransmitted
    #[serde(rename = "BytesSent", skip_serializing_if = "Option::is_none", default)]
    pub bytes_sent: Option<i64>,
    /// bytes retransmitted
    #[serde(rename = "BytesRetrans", skip_serializing_if = "Option::is_none", default)]
    pub bytes_retrans: Option<i64>,
    /// microseconds elapsed since the start of the test (mirrors `AppInfo`)
    #[serde(rename = "ElapsedTime", skip_serializing_if = "Option::is_none", default)]
    pub elapsed_time: Option<i64>,
    /// minimum RTT observed by the kernel, in microseconds
    #[serde(rename = "MinRTT", skip_serializing_if = "Option::is_none", default)]
    pub min_rtt: Option<i64>,
    /// current smoothed RTT, in microseconds
    #[serde(rename = "RTT", skip_serializing_if = "Option::is_none", default)]
    pub rtt: Option<i64>,
    /// RTT variance, in microseconds
    #[serde(rename = "RTTVar", skip_serializing_if = "Option::is_none", default)]
    pub rtt_var: Option<i64>,
    /// microseconds stalled by a full receive window at the peer
    #[serde(rename = "RWndLimited", skip_serializing_if = "Option::is_none", default)]
    pub rwnd_limited: Option<i64>,
    /// microseconds stalled by a full local send buffer
    #[serde(rename = "SndBufLimited", skip_serializing_if = "Option::is_none", default)]
    pub snd_buf_limited: Option<i64>,
    /// per-field change since the previous measurement in the group
    #[serde(rename = "Delta", skip_serializing_if = "Option::is_none", default)]
    pub delta: Option<TCPInfoDelta>,
    /// per-field rate of change since the previous measurement
    #[serde(rename = "Rate", skip_serializing_if = "Option::is_none", default)]
    pub rate: Option<TCPInfoRate>,
}

/// `TCPInfo` field deltas between two measurements in a window group
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TCPInfoDelta {
    #[serde(rename = "BusyTime")]
    #[allow(missing_docs)]
    pub busy_time: i64,
    #[serde(rename = "BytesAcked")]
    #[allow(missing_docs)]
    pub bytes_acked: i64,
    #[serde(rename = "BytesReceived")]
    #[allow(missing_docs)]
    pub bytes_received: i64,
    #[serde(rename = "BytesSent")]
    #[allow(missing_docs)]
    pub bytes_sent: i64,
    #[serde(rename = "BytesRetrans")]
    #[allow(missing_docs)]
    pub bytes_retrans: i64,
    #[serde(rename = "ElapsedTime")]
    #[allow(missing_docs)]
    pub elapsed_time: i64,
    #[serde(rename = "RWndLimited")]
    #[allow(missing_docs)]
    pub rwnd_limited: i64,
    #[serde(rename = "SndBufLimited")]
    #[allow(missing_docs)]
    pub snd_buf_limited: i64,
}

/// `TCPInfo` field rates, units/second over the delta window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TCPInfoRate {
    #[serde(rename = "BusyTime")]
    #[allow(missing_docs)]
    pub busy_time: f64,
    #[serde(rename = "BytesAcked")]
    #[allow(missing_docs)]
    pub bytes_acked: f64,
    #[serde(rename = "BytesReceived")]
    #[allow(missing_docs)]
    pub bytes_received: f64,
    #[serde(rename = "BytesSent")]
    #[allow(missing_docs)]
    pub bytes_sent: f64,
    #[serde(rename = "BytesRetrans")]
    #[allow(missing_docs)]
    pub bytes_retrans: f64,
    #[serde(rename = "ElapsedTime")]
    #[allow(missing_docs)]
    pub elapsed_time: f64,
    #[serde(rename = "RWndLimited")]
    #[allow(missing_docs)]
    pub rwnd_limited: f64,
    #[serde(rename = "SndBufLimited")]
    #[allow(missing_docs)]
    pub snd_buf_limited: f64,
}

/// a single measurement frame exchanged during an NDT7 test
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// application-level throughput counters
    #[serde(rename = "AppInfo", skip_serializing_if = "Option::is_none", default)]
    pub app_info: Option<AppInfo>,
    /// connection endpoint addresses (server role only)
    #[serde(rename = "ConnectionInfo", skip_serializing_if = "Option::is_none", default)]
    pub connection_info: Option<ConnectionInfo>,
    /// which side produced this measurement
    #[serde(rename = "Origin", skip_serializing_if = "Option::is_none", default)]
    pub origin: Option<Origin>,
    /// which subtest this measurement belongs to
    #[serde(rename = "Test", skip_serializing_if = "Option::is_none", default)]
    pub test: Option<Test>,
    /// TCP-level metrics from the kernel (present when the sender is on
    /// the TCP_INFO-capable side and the platform supports it)
    #[serde(rename = "TCPInfo", skip_serializing_if = "Option::is_none", default)]
    pub tcp_info: Option<TCPInfo>,
    /// wall-clock timestamp at which this measurement was recorded
    /// locally, used by the statistics aggregator's `time_difference`
    /// fallback when neither sub-record carries an elapsed time -- never
    /// serialized onto the wire
    #[serde(skip)]
    pub timestamp: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_exact_wire_names() {
        let measurement = Measurement {
            app_info: Some(AppInfo {
                elapsed_time: 1234,
                num_bytes: 5678,
                ..Default::default()
            }),
            origin: Some(Origin::Client),
            test: Some(Test::Download),
            ..Default::default()
        };
        let json = serde_json::to_string(&measurement).unwrap();
        assert!(json.contains(r#""AppInfo""#));
        assert!(json.contains(r#""ElapsedTime":1234"#));
        assert!(json.contains(r#""NumBytes":5678"#));
        assert!(json.contains(r#""Origin":"client""#));
        assert!(json.contains(r#""Test":"download""#));
        assert!(!json.contains("TCPInfo"));
        assert!(!json.contains("ConnectionInfo"));
        assert!(!json.contains("timestamp"));
    }

    #[test]
    fn deserializes_protocol_frame() {
        let json = r#"{
            "AppInfo": {"ElapsedTime": 1234, "NumBytes": 5678},
            "ConnectionInfo": {"Client": "1.2.3.4:5678", "Server": "[::1]:2345"},
            "Origin": "server",
            "Test": "download",
            "TCPInfo": {"RTT": 6000, "MinRTT": 5000}
        }"#;
        let m: Measurement = serde_json::from_str(json).unwrap();
        assert_eq!(m.app_info.unwrap().num_bytes, 5678);
        assert_eq!(m.connection_info.unwrap().server, "[::1]:2345");
        assert_eq!(m.origin, Some(Origin::Server));
        assert_eq!(m.test, Some(Test::Download));
        assert_eq!(m.tcp_info.unwrap().rtt, Some(6000));
    }

    #[test]
    fn round_trips() {
        let m = Measurement {
            app_info: Some(AppInfo {
                elapsed_time: 500_000,
                num_bytes: 1_048_576,
                ..Default::default()
            }),
            connection_info: Some(ConnectionInfo {
                client: "10.0.0.1:12345".into(),
                server: "10.0.0.2:443".into(),
            }),
            origin: Some(Origin::Server),
            test: Some(Test::Upload),
            tcp_info: Some(TCPInfo {
                rtt: Some(10_000),
                min_rtt: Some(8_000),
                ..Default::default()
            }),
            timestamp: 0.0,
        };
        let json = serde_json::to_string(&m).unwrap();
        let back: Measurement = serde_json::from_str(&json).unwrap();
        assert_eq!(m.app_info, back.app_info);
        assert_eq!(m.tcp_info, back.tcp_info);
    }
}
