use prost::Message;

use logfan_proto::v0::{AssignChunkRequest, AssignChunkResponse, ByteRange, Metrics};

#[test]
fn assign_chunk_request_prost_roundtrip() {
    let msg = AssignChunkRequest {
        chunk_id: 3,
        attempt: 2,
        file_path: "/data/app.log".to_string(),
        range: Some(ByteRange {
            start: 768,
            size: 256,
        }),
    };

    let bytes = msg.encode_to_vec();
    let decoded = AssignChunkRequest::decode(bytes.as_slice()).unwrap();
    assert_eq!(decoded, msg);
}

#[test]
fn assign_chunk_response_prost_roundtrip() {
    let msg = AssignChunkResponse {
        chunk_id: 1,
        metrics: Some(Metrics {
            error_count: 2,
            request_count: 3,
            total_latency_ms: 372,
        }),
    };

    let bytes = msg.encode_to_vec();
    let decoded = AssignChunkResponse::decode(bytes.as_slice()).unwrap();
    assert_eq!(decoded, msg);
}
