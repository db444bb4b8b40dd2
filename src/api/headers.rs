// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Tracing headers every request must carry.

use super::AppState;
use super::response::AppError;
use crate::error::{LedgerError, Result};
use crate::store::LedgerStore;
use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use tracing::{Span, info_span};

pub const APPLICATION_ID: &str = "ait-id";
pub const BUSINESS_TAXONOMY_ID: &str = "business-taxonomy-id";
pub const CORRELATION_ID: &str = "correlation-id";
pub const ACCEPT_VERSION: &str = "accept-version";

/// The required headers of a request. Present but empty values are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeaders {
    pub application_id: String,
    pub business_taxonomy_id: String,
    pub correlation_id: String,
    pub accept_version: String,
}

impl RequestHeaders {
    /// # Errors
    ///
    /// - [`LedgerError::MissingHeader`] - A required header is absent.
    /// - [`LedgerError::InvalidField`] - A header value is not visible ASCII.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self> {
        Ok(Self {
            application_id: header(headers, APPLICATION_ID)?,
            business_taxonomy_id: header(headers, BUSINESS_TAXONOMY_ID)?,
            correlation_id: header(headers, CORRELATION_ID)?,
            accept_version: header(headers, ACCEPT_VERSION)?,
        })
    }

    pub fn require_version(&self, expected: &str) -> Result<()> {
        if self.accept_version == expected {
            Ok(())
        } else {
            Err(LedgerError::UnsupportedVersion(self.accept_version.clone()))
        }
    }

    /// Span carrying the request-tracing data for one operation.
    pub fn span(&self, operation: &'static str) -> Span {
        info_span!(
            "request",
            operation,
            correlation_id = %self.correlation_id,
            business_taxonomy_id = %self.business_taxonomy_id,
            application_id = %self.application_id,
        )
    }
}

fn header(headers: &HeaderMap, name: &'static str) -> Result<String> {
    let value = headers
        .get(name)
        .ok_or(LedgerError::MissingHeader(name))?;
    value
        .to_str()
        .map(str::to_owned)
        .map_err(|_| LedgerError::invalid(name, "header value is not visible ASCII"))
}

impl<S> FromRequestParts<AppState<S>> for RequestHeaders
where
    S: LedgerStore + 'static,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState<S>,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn full_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(APPLICATION_ID, HeaderValue::from_static("12345"));
        headers.insert(BUSINESS_TAXONOMY_ID, HeaderValue::from_static("jimmy"));
        headers.insert(CORRELATION_ID, HeaderValue::from_static("corr-1"));
        headers.insert(ACCEPT_VERSION, HeaderValue::from_static("1_0"));
        headers
    }

    #[test]
    fn all_headers_present() {
        let parsed = RequestHeaders::from_headers(&full_headers()).unwrap();
        assert_eq!(parsed.correlation_id, "corr-1");
        parsed.require_version("1_0").unwrap();
    }

    #[test]
    fn each_missing_header_is_named() {
        for name in [
            APPLICATION_ID,
            BUSINESS_TAXONOMY_ID,
            CORRELATION_ID,
            ACCEPT_VERSION,
        ] {
            let mut headers = full_headers();
            headers.remove(name);
            assert_eq!(
                RequestHeaders::from_headers(&headers).unwrap_err(),
                LedgerError::MissingHeader(name)
            );
        }
    }

    #[test]
    fn empty_header_is_accepted() {
        let mut headers = full_headers();
        headers.insert(CORRELATION_ID, HeaderValue::from_static(""));
        assert_eq!(
            RequestHeaders::from_headers(&headers).unwrap().correlation_id,
            ""
        );
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut headers = full_headers();
        headers.insert(ACCEPT_VERSION, HeaderValue::from_static("2_0"));
        let parsed = RequestHeaders::from_headers(&headers).unwrap();
        assert_eq!(
            parsed.require_version("1_0").unwrap_err(),
            LedgerError::UnsupportedVersion("2_0".into())
        );
    }
}
