//! AWS SigV4 request signing for the bidirectional streaming HTTP request to
//! the Bedrock runtime endpoint. Built from the same HMAC-SHA256 primitives
//! the webhook-signature verifier elsewhere in this workspace uses — there is
//! no AWS SDK dependency here, just the signature algorithm over plain HTTP
//! headers.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use rusty_claw_core::error::{Result, RustyClawError};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "bedrock";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// AWS credentials used to sign a request.
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// The headers a signed request must carry, produced by [`sign_request`].
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub authorization: String,
    pub x_amz_date: String,
    pub x_amz_content_sha256: String,
    pub x_amz_security_token: Option<String>,
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| RustyClawError::Signing(format!("invalid HMAC key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// URI-encode one path segment per SigV4 canonical-URI rules (RFC 3986
/// unreserved set preserved, everything else percent-encoded, `/` kept as a
/// path separator).
fn canonical_uri(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Sign an HTTP request for the Bedrock bidirectional-streaming endpoint.
///
/// `host` is the bare hostname (no scheme), `path` is the absolute request
/// path, `region` is the AWS region the endpoint is hosted in, `amz_date` is
/// an ISO8601 basic-format UTC timestamp (`YYYYMMDDTHHMMSSZ`) supplied by the
/// caller — this module performs no wall-clock reads itself.
pub fn sign_request(
    credentials: &AwsCredentials,
    region: &str,
    method: &str,
    host: &str,
    path: &str,
    amz_date: &str,
) -> Result<SignedHeaders> {
    let date_stamp = &amz_date[0..8];
    let payload_hash = sha256_hex(&[]);

    let mut canonical_headers = format!(
        "host:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n"
    );
    let mut signed_headers = "host;x-amz-content-sha256;x-amz-date".to_string();
    if let Some(token) = &credentials.session_token {
        canonical_headers.push_str(&format!("x-amz-security-token:{token}\n"));
        signed_headers.push_str(";x-amz-security-token");
    }

    let canonical_request = format!(
        "{method}\n{uri}\n\n{headers}\n{signed}\n{hash}",
        method = method,
        uri = canonical_uri(path),
        headers = canonical_headers,
        signed = signed_headers,
        hash = payload_hash,
    );

    let credential_scope = format!("{date_stamp}/{region}/{SERVICE}/aws4_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{credential_scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let k_date = hmac(format!("AWS4{}", credentials.secret_access_key).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, SERVICE.as_bytes())?;
    let k_signing = hmac(&k_service, b"aws4_request")?;
    let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key_id,
    );

    Ok(SignedHeaders {
        authorization,
        x_amz_date: amz_date.to_string(),
        x_amz_content_sha256: payload_hash,
        x_amz_security_token: credentials.session_token.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIAEXAMPLE".to_string(),
            secret_access_key: "secretkeyexample".to_string(),
            session_token: None,
        }
    }

    #[test]
    fn signs_a_request_deterministically() {
        let headers = sign_request(
            &creds(),
            "us-east-1",
            "POST",
            "bedrock-runtime.us-east-1.amazonaws.com",
            "/model/amazon.nova-sonic-v1:0/invoke-with-bidirectional-stream",
            "20260101T000000Z",
        )
        .unwrap();

        assert!(headers.authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKIAEXAMPLE/20260101/us-east-1/bedrock/aws4_request"));
        assert!(headers.authorization.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));
        assert_eq!(headers.x_amz_date, "20260101T000000Z");
        // SHA-256 of an empty payload is a fixed, well-known value.
        assert_eq!(
            headers.x_amz_content_sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn includes_session_token_when_present() {
        let mut c = creds();
        c.session_token = Some("FQoGZXIvYXdzEB".to_string());
        let headers = sign_request(
            &c,
            "us-east-1",
            "POST",
            "bedrock-runtime.us-east-1.amazonaws.com",
            "/model/amazon.nova-sonic-v1:0/invoke-with-bidirectional-stream",
            "20260101T000000Z",
        )
        .unwrap();

        assert!(headers.authorization.contains("x-amz-security-token"));
        assert_eq!(headers.x_amz_security_token.as_deref(), Some("FQoGZXIvYXdzEB"));
    }

    #[test]
    fn signature_changes_when_date_changes() {
        let a = sign_request(
            &creds(),
            "us-east-1",
            "POST",
            "bedrock-runtime.us-east-1.amazonaws.com",
            "/model/amazon.nova-sonic-v1:0/invoke-with-bidirectional-stream",
            "20260101T000000Z",
        )
        .unwrap();
        let b = sign_request(
            &creds(),
            "us-east-1",
            "POST",
            "bedrock-runtime.us-east-1.amazonaws.com",
            "/model/amazon.nova-sonic-v1:0/invoke-with-bidirectional-stream",
            "20260102T000000Z",
        )
        .unwrap();
        assert_ne!(a.authorization, b.authorization);
    }
}
