use rosc::{OscMessage, OscPacket, OscType};

use crate::core::StateChange;

/// What a touch controller asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum TouchCommand {
    SetParameter { path: String, value: f64 },
    ToggleDevice(String),
    TriggerScene(String),
    Ignore,
    Unknown(String),
}

impl TouchCommand {
    pub fn route(message: &OscMessage, is_parameter: impl Fn(&str) -> bool) -> Self {
        let path = message.addr.as_str();
        let value = first_number(&message.args);

        if is_parameter(path) {
            return match value {
                Some(value) => TouchCommand::SetParameter {
                    path: path.to_string(),
                    value,
                },
                None => TouchCommand::Unknown(path.to_string()),
            };
        }

        let mut segments = path.split('/').skip(1);
        match (segments.next(), segments.next()) {
            (Some("dev"), Some(name)) if !name.is_empty() => TouchCommand::ToggleDevice(name.to_string()),
            (Some("scene" | "action"), Some(name)) if !name.is_empty() => {
                if value == Some(1.0) {
                    TouchCommand::TriggerScene(name.to_string())
                } else {
                    TouchCommand::Ignore
                }
            }
            (Some("page"), _) => TouchCommand::Ignore,
            _ => TouchCommand::Unknown(path.to_string()),
        }
    }
}

fn first_number(args: &[OscType]) -> Option<f64> {
    match args.first()? {
        OscType::Float(v) => Some(*v as f64),
        OscType::Double(v) => Some(*v),
        OscType::Int(v) => Some(*v as f64),
        OscType::Long(v) => Some(*v as f64),
        OscType::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// All messages of a packet, bundles flattened in order.
pub fn flatten(packet: OscPacket) -> Vec<OscMessage> {
    match packet {
        OscPacket::Message(message) => vec![message],
        OscPacket::Bundle(bundle) => bundle.content.into_iter().flat_map(flatten).collect(),
    }
}

pub fn decode(datagram: &[u8]) -> anyhow::Result<Vec<OscMessage>> {
    let (_, packet) =
        rosc::decoder::decode_udp(datagram).map_err(|e| anyhow::anyhow!("Error decoding OSC packet: {:?}", e))?;
    Ok(flatten(packet))
}

pub fn encode(change: &StateChange) -> anyhow::Result<Vec<u8>> {
    let packet = OscPacket::Message(OscMessage {
        addr: change.path.clone(),
        args: vec![OscType::Float(change.value as f32)],
    });
    rosc::encoder::encode(&packet).map_err(|e| anyhow::anyhow!("Error encoding {}: {:?}", change, e))
}
