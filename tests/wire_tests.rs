//! Envelope codec tests

#[cfg(test)]
mod tests {
    use atrium_sync::protocol::{
        ChatKind, ClientHello, EntitySpawn, EntityUpdate, Envelope, MessageType, Payload,
        PlayerSnapshot, PresenceData, PresenceKind, ServerHello, VoiceCodec, WorldState,
    };
    use atrium_sync::types::{Quaternion, Vector3};
    use atrium_sync::wire::{decode_envelope, encode_envelope, DecodeError};
    use std::collections::HashMap;

    // -----------------------------------------------------------------------
    // Raw frame construction helpers (for malformed-input cases)
    // -----------------------------------------------------------------------

    fn varint(mut v: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                return out;
            }
            out.push(byte | 0x80);
        }
    }

    fn tag(field: u32, wire_type: u32) -> Vec<u8> {
        varint(u64::from((field << 3) | wire_type))
    }

    fn len_field(field: u32, body: &[u8]) -> Vec<u8> {
        let mut out = tag(field, 2);
        out.extend(varint(body.len() as u64));
        out.extend_from_slice(body);
        out
    }

    fn uint_field(field: u32, v: u64) -> Vec<u8> {
        let mut out = tag(field, 0);
        out.extend(varint(v));
        out
    }

    // -----------------------------------------------------------------------
    // Round-trips, one per payload variant
    // -----------------------------------------------------------------------

    fn roundtrip(env: Envelope) {
        let bytes = encode_envelope(&env);
        let decoded = decode_envelope(&bytes).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn roundtrip_client_hello() {
        roundtrip(Envelope::new(Payload::ClientHello(ClientHello {
            client_id: "c-77".into(),
            display_name: "Ann".into(),
            auth_token: "tok".into(),
            requested_room: "lobby".into(),
        })));
    }

    #[test]
    fn roundtrip_server_hello_with_snapshot() {
        let mut components = HashMap::new();
        components.insert("color".to_string(), b"red".to_vec());

        roundtrip(Envelope::new(Payload::ServerHello(ServerHello {
            server_version: "0.1.0".into(),
            assigned_client_id: "c-1".into(),
            room_id: "lobby".into(),
            initial_state: WorldState {
                entities: vec![atrium_sync::protocol::EntitySnapshot {
                    id: "e1".into(),
                    template_id: "prop/crate".into(),
                    position: Vector3::new(1.0, -2.5, 3.25),
                    rotation: Quaternion::identity(),
                    components,
                }],
                players: vec![PlayerSnapshot {
                    client_id: "c-2".into(),
                    display_name: "Bob".into(),
                    avatar_url: "a://bob".into(),
                    position: Vector3::zero(),
                    rotation: Quaternion::new(0.0, 0.5, 0.0, 0.5),
                }],
                last_update: 1_700_000_000_123,
            },
        })));
    }

    #[test]
    fn roundtrip_position_update() {
        roundtrip(Envelope::position_update(
            "e1",
            Vector3::new(10.5, 0.0, -4.75),
            Quaternion::new(0.0, 0.25, 0.0, 0.75),
            42,
        ));
    }

    #[test]
    fn roundtrip_voice_data() {
        roundtrip(Envelope::voice_data(
            "c-1",
            vec![0x01, 0x02, 0xff, 0x00, 0x7f],
            9000,
            VoiceCodec::Pcmu,
        ));
    }

    #[test]
    fn roundtrip_entity_spawn_with_components() {
        let mut components = HashMap::new();
        components.insert("mesh".to_string(), b"crate.glb".to_vec());
        components.insert("mass".to_string(), vec![0, 0, 0x80, 0x3f]);
        roundtrip(Envelope::entity_spawn(EntitySpawn {
            entity_id: "e1".into(),
            template_id: "prop/crate".into(),
            owner_id: "c-1".into(),
            components,
        }));
    }

    #[test]
    fn roundtrip_entity_update() {
        let mut components = HashMap::new();
        components.insert("state".to_string(), b"open".to_vec());
        roundtrip(Envelope::entity_update(EntityUpdate {
            entity_id: "e1".into(),
            components,
        }));
    }

    #[test]
    fn roundtrip_entity_despawn() {
        roundtrip(Envelope::entity_despawn("e1"));
    }

    #[test]
    fn roundtrip_chat_message() {
        roundtrip(Envelope::chat("c-1", "hello room", ChatKind::Shout));
    }

    #[test]
    fn roundtrip_presence_events() {
        roundtrip(Envelope::presence(
            "c-1",
            PresenceKind::Join,
            Some(PresenceData {
                display_name: "Ann".into(),
                avatar_url: "a://ann".into(),
                position: Some(Vector3::new(0.0, 1.6, 0.0)),
                rotation: None,
            }),
        ));
        roundtrip(Envelope::presence("c-1", PresenceKind::Leave, None));
        roundtrip(Envelope::presence(
            "c-1",
            PresenceKind::Update,
            Some(PresenceData::default()),
        ));
    }

    // -----------------------------------------------------------------------
    // Exclusivity and discriminator validation
    // -----------------------------------------------------------------------

    #[test]
    fn two_payload_fields_rejected() {
        // type = CHAT_MESSAGE, then both a chat payload (field 17) and a
        // despawn payload (field 16).
        let mut frame = Vec::new();
        frame.extend(uint_field(3, 30));
        frame.extend(len_field(17, &[]));
        frame.extend(len_field(16, &len_field(1, b"e1")));
        assert_eq!(decode_envelope(&frame), Err(DecodeError::MultiplePayloads));
    }

    #[test]
    fn repeated_same_payload_field_rejected() {
        let mut frame = Vec::new();
        frame.extend(uint_field(3, 30));
        frame.extend(len_field(17, &[]));
        frame.extend(len_field(17, &[]));
        assert_eq!(decode_envelope(&frame), Err(DecodeError::MultiplePayloads));
    }

    #[test]
    fn declared_type_must_match_payload() {
        // Declared POSITION_UPDATE but carrying a chat payload.
        let mut frame = Vec::new();
        frame.extend(uint_field(3, 10));
        frame.extend(len_field(17, &[]));
        assert_eq!(
            decode_envelope(&frame),
            Err(DecodeError::TypeMismatch {
                declared: MessageType::PositionUpdate,
                found: MessageType::ChatMessage,
            })
        );
    }

    #[test]
    fn presence_discriminator_tracks_event_kind() {
        // A presence payload with kind UPDATE under a PRESENCE_JOIN
        // discriminator is a mismatch.
        let body = {
            let mut b = len_field(1, b"c-1");
            b.extend(uint_field(2, PresenceKind::Update.raw() as u64));
            b
        };
        let mut frame = Vec::new();
        frame.extend(uint_field(3, 40));
        frame.extend(len_field(18, &body));
        assert_eq!(
            decode_envelope(&frame),
            Err(DecodeError::TypeMismatch {
                declared: MessageType::PresenceJoin,
                found: MessageType::PresenceUpdate,
            })
        );
    }

    #[test]
    fn missing_payload_rejected() {
        let frame = uint_field(3, 30);
        assert_eq!(decode_envelope(&frame), Err(DecodeError::MissingPayload));
    }

    #[test]
    fn missing_type_rejected() {
        let frame = len_field(17, &[]);
        assert_eq!(decode_envelope(&frame), Err(DecodeError::MissingType));
    }

    #[test]
    fn unknown_message_type_rejected() {
        let mut frame = Vec::new();
        frame.extend(uint_field(3, 99));
        frame.extend(len_field(17, &[]));
        assert_eq!(
            decode_envelope(&frame),
            Err(DecodeError::UnknownMessageType(99))
        );
    }

    #[test]
    fn unknown_enum_value_rejected() {
        // Voice payload with codec = 9.
        let body = {
            let mut b = len_field(1, b"c-1");
            b.extend(uint_field(4, 9));
            b
        };
        let mut frame = Vec::new();
        frame.extend(uint_field(3, 11));
        frame.extend(len_field(13, &body));
        assert_eq!(
            decode_envelope(&frame),
            Err(DecodeError::UnknownEnumValue {
                field: "voice codec",
                value: 9,
            })
        );
    }

    // -----------------------------------------------------------------------
    // Forward compatibility and malformed input
    // -----------------------------------------------------------------------

    #[test]
    fn unknown_envelope_fields_skipped() {
        let env = Envelope::chat("c-1", "hi", ChatKind::Normal);
        let mut frame = encode_envelope(&env).to_vec();
        // A future varint field and a future length-delimited field.
        frame.extend(uint_field(200, 5));
        frame.extend(len_field(201, b"future"));
        let decoded = decode_envelope(&frame).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn unknown_nested_fields_skipped() {
        // Hand-built position payload with an extra field between the
        // known ones.
        let body = {
            let mut b = len_field(1, b"e1");
            b.extend(len_field(99, b"xyz"));
            b.extend(uint_field(4, 7));
            b
        };
        let mut frame = Vec::new();
        frame.extend(uint_field(3, 10));
        frame.extend(len_field(12, &body));

        let decoded = decode_envelope(&frame).unwrap();
        let Payload::PositionUpdate(update) = decoded.payload else {
            panic!("wrong payload variant");
        };
        assert_eq!(update.entity_id, "e1");
        assert_eq!(update.sequence_number, 7);
    }

    #[test]
    fn truncated_frames_rejected() {
        let env = Envelope::position_update(
            "e1",
            Vector3::new(1.0, 2.0, 3.0),
            Quaternion::identity(),
            5,
        );
        let bytes = encode_envelope(&env);
        // Every strict prefix must fail or decode to something incomplete,
        // never panic. Cutting inside the payload must error.
        for cut in 1..bytes.len() {
            let _ = decode_envelope(&bytes[..cut]);
        }
        assert!(decode_envelope(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn empty_frame_rejected() {
        assert_eq!(decode_envelope(&[]), Err(DecodeError::MissingPayload));
    }

    #[test]
    fn voice_payload_is_opaque() {
        // Arbitrary bytes survive untouched, including protobuf-looking
        // garbage.
        let audio = vec![0x08, 0x96, 0x01, 0xff, 0xff, 0xff];
        let env = Envelope::voice_data("c-1", audio.clone(), 1, VoiceCodec::Opus);
        let decoded = decode_envelope(&encode_envelope(&env)).unwrap();
        let Payload::VoiceData(voice) = decoded.payload else {
            panic!("wrong payload variant");
        };
        assert_eq!(voice.audio_data, audio);
    }
}
