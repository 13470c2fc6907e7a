use crate::constants::*;

pub fn validate_message_text(text: &str) -> Result<(), String> {
    if text.trim().is_empty() {
        return Err("Message text is required".into());
    }
    if text.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(format!(
            "Message must be at most {} characters",
            MAX_MESSAGE_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_comment_text(text: &str) -> Result<(), String> {
    if text.trim().is_empty() {
        return Err("Comment text is required".into());
    }
    if text.chars().count() > MAX_COMMENT_LENGTH {
        return Err(format!(
            "Comment must be at most {} characters",
            MAX_COMMENT_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_title(title: &str) -> Result<(), String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err("Title is required".into());
    }
    if trimmed.chars().count() > MAX_TITLE_LENGTH {
        return Err(format!("Title must be at most {} characters", MAX_TITLE_LENGTH));
    }
    Ok(())
}

pub fn validate_summary(summary: &str) -> Result<(), String> {
    if summary.chars().count() > MAX_SUMMARY_LENGTH {
        return Err(format!(
            "Summary must be at most {} characters",
            MAX_SUMMARY_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_user_id(uid: &str) -> Result<(), String> {
    if uid.is_empty() {
        return Err("User id is required".into());
    }
    // The separator would make room ids ambiguous
    if uid.contains(ROOM_ID_SEPARATOR) || uid.contains('/') {
        return Err(format!(
            "User id cannot contain '{}' or '/'",
            ROOM_ID_SEPARATOR
        ));
    }
    Ok(())
}

pub fn validate_tag_count(count: usize) -> Result<(), String> {
    if count > MAX_TAGS {
        return Err(format!("At most {} tags are allowed", MAX_TAGS));
    }
    Ok(())
}
