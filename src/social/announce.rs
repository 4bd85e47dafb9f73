use crate::core::types::{GradeResult, Pool, PoolId};

pub fn pool_url(frontend_url_prefix: &str, pool_id: PoolId) -> String {
    format!("{}{}", frontend_url_prefix, pool_id.to_hex())
}

/// Announcement for a freshly created pool. `source_url` links the post
/// that asked for it.
pub fn creation_text(
    pool_id: PoolId,
    question: &str,
    options: &[String],
    frontend_url_prefix: &str,
    source_url: &str,
) -> String {
    let option = |i: usize| options.get(i).map(String::as_str).unwrap_or_default();
    let mut text = format!(
        "🎲 New Prediction Pool!\n\nQ: {}\nA) {}\nB) {}\n\nPlace your bets: {}",
        question,
        option(0),
        option(1),
        pool_url(frontend_url_prefix, pool_id),
    );
    if !source_url.is_empty() {
        text.push('\n');
        text.push_str(source_url);
    }
    text
}

/// Announcement for a graded pool, quoting its creation post. None for
/// results that do not close a market.
pub fn close_text(pool: &Pool, result: GradeResult, frontend_url_prefix: &str) -> Option<String> {
    let result_text = match (result, pool.option_label(result)) {
        (GradeResult::OptionA, Some(label)) => format!("Option A wins: {label}"),
        (GradeResult::OptionB, Some(label)) => format!("Option B wins: {label}"),
        (GradeResult::Push, _) => "Market resulted in a push".to_string(),
        _ => return None,
    };

    let mut text = format!(
        "🎯 Market Closed!\n\nQ: {}\nResult: {}\n\nView details: {}",
        pool.question,
        result_text,
        pool_url(frontend_url_prefix, pool.id),
    );
    if let Some(post_id) = &pool.external_post_id {
        text.push_str(&format!("\n\nhttps://twitter.com/user/status/{post_id}"));
    }
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_creation_text() {
        let options = vec!["Yes".to_string(), "No".to_string()];
        let text = creation_text(
            PoolId(36),
            "Will it snow?",
            &options,
            "https://app.example/pools/",
            "https://x.com/a/status/1",
        );
        assert!(text.starts_with("🎲 New Prediction Pool!"));
        assert!(text.contains("A) Yes\nB) No"));
        assert!(text.contains("https://app.example/pools/0x24"));
        assert!(text.ends_with("https://x.com/a/status/1"));
    }

    #[test]
    fn test_close_text_per_result() {
        let pool = Pool::sample(3, Utc::now(), chrono::Duration::days(1));

        let a = close_text(&pool, GradeResult::OptionA, "https://app/").unwrap();
        assert!(a.contains("Result: Option A wins: Yes"));
        assert!(a.contains("https://app/0x03"));
        assert!(a.ends_with("https://twitter.com/user/status/1850000000000000000"));

        let b = close_text(&pool, GradeResult::OptionB, "https://app/").unwrap();
        assert!(b.contains("Option B wins: No"));

        let push = close_text(&pool, GradeResult::Push, "https://app/").unwrap();
        assert!(push.contains("Market resulted in a push"));

        assert_eq!(close_text(&pool, GradeResult::Unresolved, "https://app/"), None);
    }
}
