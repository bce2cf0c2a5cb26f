use flagsnap_lib::{parse_snapshot, FeatureRegistry};

/// Fetches a snapshot from `url` and writes it to `output` only if it passes
/// the same validation the runtime applies.
pub async fn run_pull_inner(
    url: &str,
    output: &str,
    token: Option<&str>,
    features: &FeatureRegistry,
) -> Result<(), ()> {
    let client = reqwest::Client::new();
    let mut request = client.get(url).header("Accept", "application/json");
    if let Some(token) = token {
        request = request.header("Authorization", format!("Bearer {}", token));
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to pull: {}", e);
            return Err(());
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        eprintln!("Pull failed ({}): {}", status, body);
        return Err(());
    }

    let body = match response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Failed to read response body: {}", e);
            return Err(());
        }
    };

    let snapshot = match parse_snapshot(&body, features) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Refusing to write {}: {}", output, e);
            return Err(());
        }
    };

    if let Err(e) = std::fs::write(output, &body) {
        eprintln!("Failed to write {}: {}", output, e);
        return Err(());
    }

    let version = snapshot
        .meta()
        .and_then(|m| m.version.as_deref())
        .unwrap_or("unversioned");
    println!(
        "\u{2713} Pulled {} flags ({}) from {} to {}",
        snapshot.len(),
        version,
        url,
        output
    );
    Ok(())
}
