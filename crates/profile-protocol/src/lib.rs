//! Wire primitives and the framed request/response protocol shared by every
//! component of the profile server core (§4.B, §6).

pub mod codec;
pub mod envelope;
pub mod error;
pub mod messages;
pub mod model;
pub mod primitives;
pub mod roles;
pub mod signing;

pub use error::{ProtocolError, StatusCode};
pub use primitives::{Challenge, GpsLocation, IdentityId, PublicKey, SemVer, Signature};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{decode_body, encode_body, Envelope, RequestFrame};
    use crate::messages::PingRequest;

    #[test]
    fn identity_id_is_sha256_of_public_key() {
        let pk = PublicKey(vec![1, 2, 3, 4]);
        let id = IdentityId::of_public_key(&pk);
        use sha2::{Digest, Sha256};
        let expected = Sha256::digest(&pk.0);
        assert_eq!(&id.0[..], &expected[..]);
    }

    #[test]
    fn semver_negotiates_highest_common_version() {
        let offered = vec![SemVer::new(1, 0, 0), SemVer::new(0, 9, 0)];
        let accepted = vec![SemVer::new(1, 0, 0)];
        assert_eq!(SemVer::negotiate(&offered, &accepted), Some(SemVer::new(1, 0, 0)));

        let offered = vec![SemVer::new(2, 0, 0)];
        assert_eq!(SemVer::negotiate(&offered, &accepted), None);
    }

    #[test]
    fn gps_distance_zero_for_identical_points() {
        let a = GpsLocation::from_degrees(50.0872, 14.4210);
        assert_eq!(a.distance_meters(&a), 0.0);
    }

    #[test]
    fn gps_fixed_point_roundtrips_to_six_decimals() {
        let loc = GpsLocation::from_degrees(50.0872, 14.4210);
        assert!((loc.latitude_degrees() - 50.0872).abs() < 1e-6);
        assert!((loc.longitude_degrees() - 14.4210).abs() < 1e-6);
    }

    #[test]
    fn envelope_roundtrips_through_bytes() {
        let ping = PingRequest { version: None, payload: vec![0xDE, 0xAD, 0xBE, 0xEF] };
        let body = encode_body(&ping);
        let frame = RequestFrame { request_id: 7, type_code: 0, signature: None, body };
        let envelope = Envelope::request(frame);

        use prost::Message;
        let bytes = envelope.encode_to_vec();
        let decoded = Envelope::decode(bytes.as_slice()).unwrap();

        let frame = codec::expect_request(decoded).unwrap();
        assert_eq!(frame.request_id, 7);
        let decoded_ping: PingRequest = decode_body(&frame.body).unwrap();
        assert_eq!(decoded_ping.payload, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn frame_length_prefix_round_trips_over_a_duplex_pipe() {
        use tokio::io::duplex;
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let (mut a, mut b) = duplex(4096);
            let ping = PingRequest { version: None, payload: vec![1, 2, 3] };
            let frame =
                RequestFrame { request_id: 1, type_code: 0, signature: None, body: encode_body(&ping) };
            codec::write_envelope(&mut a, &Envelope::request(frame)).await.unwrap();
            let got = codec::read_envelope(&mut b).await.unwrap().unwrap();
            let got_frame = codec::expect_request(got).unwrap();
            let got_ping: PingRequest = decode_body(&got_frame.body).unwrap();
            assert_eq!(got_ping.payload, vec![1, 2, 3]);
        });
    }
}
