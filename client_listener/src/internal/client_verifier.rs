use x509_parser::prelude::*;

/// Requests a client certificate during the handshake and accepts whatever
/// well-formed certificate is offered. No chain validation takes place: the
/// certificate is only used as an identity, by fingerprint.
pub struct AcceptAnyClientCertVerifier(rustls::DistinguishedNames);

impl AcceptAnyClientCertVerifier {
    pub fn new(cert_for_name: &rustls::Certificate) -> Self {
        let mut names = Vec::new();

        if let Ok((_, cert)) = X509Certificate::from_der(&cert_for_name.0) {
            names.push(rustls::internal::msgs::base::PayloadU16::new(
                cert.subject().as_raw().to_vec(),
            ));
        }

        Self(names)
    }
}

impl rustls::server::ClientCertVerifier for AcceptAnyClientCertVerifier {
    fn client_auth_root_subjects(&self) -> Option<rustls::DistinguishedNames> {
        // None aborts the handshake and an empty list suppresses the
        // certificate request, so advertise our own subject
        Some(self.0.clone())
    }

    fn verify_client_cert(
        &self,
        end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _now: std::time::SystemTime,
    ) -> Result<rustls::server::ClientCertVerified, rustls::Error> {
        if X509Certificate::from_der(&end_entity.0).is_err() {
            tracing::debug!("Rejecting malformed client certificate");
            Err(rustls::Error::InvalidCertificateEncoding)
        } else {
            Ok(rustls::server::ClientCertVerified::assertion())
        }
    }

    fn client_auth_mandatory(&self) -> Option<bool> {
        Some(false)
    }
}
