use std::path::Path;

use serde_json::Value;

use crate::error::ReleaseError;
use crate::version::{PACKAGE_JSON, Version, read_package_json, version_of};

/// Require the bundle's `package.json` to carry exactly `expected`.
///
/// Nothing gets tagged or published unless this passes.
pub async fn verify_bundle(expected: &Version, bundle_dir: &Path) -> Result<(), ReleaseError> {
    let mismatch = |found: String| ReleaseError::BundleVersionMismatch {
        expected: expected.to_string(),
        found,
    };
    let package_json = read_package_json(&bundle_dir.join(PACKAGE_JSON))
        .await
        .map_err(|e| mismatch(format!("<unreadable: {}>", e)))?;
    match version_of(&package_json) {
        Some(found) if found == *expected => {
            tracing::info!("bundle: version {} verified", found);
            Ok(())
        }
        _ => Err(mismatch(raw_version(&package_json))),
    }
}

fn raw_version(package_json: &Value) -> String {
    match package_json.get("version") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "<missing>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_with(version_json: &str) -> tempfile::TempDir {
        let td = tempfile::tempdir().unwrap();
        std::fs::write(
            td.path().join("package.json"),
            format!(r#"{{"name": "pkg", "version": {}}}"#, version_json),
        )
        .unwrap();
        td
    }

    #[tokio::test]
    async fn equal_versions_pass() {
        for v in ["0.0.1", "4.15.3", "10.0.0"] {
            let td = bundle_with(&format!("\"{}\"", v));
            let expected = crate::version::parse_version(v).unwrap();
            verify_bundle(&expected, td.path()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn any_difference_fails() {
        let expected = Version::new(4, 15, 3);
        for found in ["4.15.2", "4.16.3", "5.15.3", "4.15.3-rc.1"] {
            let td = bundle_with(&format!("\"{}\"", found));
            match verify_bundle(&expected, td.path()).await {
                Err(ReleaseError::BundleVersionMismatch { expected: e, found: f }) => {
                    assert_eq!(e, "4.15.3");
                    assert_eq!(f, found);
                }
                other => panic!("{found}: unexpected result {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn non_string_or_missing_version_fails() {
        let expected = Version::new(1, 0, 0);
        let td = bundle_with("100");
        assert!(matches!(
            verify_bundle(&expected, td.path()).await,
            Err(ReleaseError::BundleVersionMismatch { ref found, .. }) if found == "100"
        ));

        let td = tempfile::tempdir().unwrap();
        std::fs::write(td.path().join("package.json"), "{}").unwrap();
        assert!(matches!(
            verify_bundle(&expected, td.path()).await,
            Err(ReleaseError::BundleVersionMismatch { ref found, .. }) if found == "<missing>"
        ));
    }

    #[tokio::test]
    async fn unreadable_bundle_fails() {
        let td = tempfile::tempdir().unwrap();
        let err = verify_bundle(&Version::new(1, 0, 0), td.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::BundleVersionMismatch { .. }));
    }
}
