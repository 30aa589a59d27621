mod common;

use serde_json::json;
use std::sync::atomic::Ordering;

use collect_atoms::submissions::SubmissionStatus;
use collect_block::types::TaskBody;
use common::{harness, in_days, task_body, upload, MODULE, STAFF};

const STUDENT: &str = "stu-1";

#[tokio::test]
async fn test_drafts_and_unscoped_tasks_are_not_found() {
    let h = harness();
    let draft = h
        .service
        .create_task(STAFF, &task_body("Draft", &[("ID", true)], Some(in_days(1))))
        .await
        .unwrap();
    assert_eq!(
        h.service.get_portal_task(STUDENT, &draft.task.task_id).await.unwrap_err().code(),
        "NOT_FOUND"
    );

    let scoped: TaskBody = serde_json::from_value(json!({
        "title": "Scoped",
        "dueAt": in_days(1),
        "scopes": [{ "scopeType": "role", "refId": "monitor" }],
        "items": [{ "title": "Form", "required": true }]
    }))
    .unwrap();
    let scoped_id = h.service.create_task(STAFF, &scoped).await.unwrap().task.task_id;
    h.service.publish_task(STAFF, &scoped_id).await.unwrap();

    assert_eq!(
        h.service.get_portal_task(STUDENT, &scoped_id).await.unwrap_err().code(),
        "NOT_FOUND"
    );
    assert!(h.service.list_portal_tasks(STUDENT).await.unwrap().is_empty());

    h.visibility.show_task(STUDENT, &scoped_id);
    let detail = h.service.get_portal_task(STUDENT, &scoped_id).await.unwrap();
    assert!(detail.accepting_submissions);
    assert_eq!(detail.missing_item_ids.len(), 1);
    assert_eq!(h.service.list_portal_tasks(STUDENT).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_notice_bound_task_follows_notice_visibility() {
    let h = harness();
    h.notices.add("n1");
    let body: TaskBody = serde_json::from_value(json!({
        "title": "Notice task",
        "dueAt": in_days(1),
        "source": { "sourceType": "notice", "sourceId": "n1" },
        "items": [{ "title": "Form", "required": true }]
    }))
    .unwrap();
    let id = h.service.create_task(STAFF, &body).await.unwrap().task.task_id;
    h.service.publish_task(STAFF, &id).await.unwrap();

    assert_eq!(h.service.get_portal_task(STUDENT, &id).await.unwrap_err().code(), "NOT_FOUND");
    h.visibility.show_notice(STUDENT, "n1");
    assert_eq!(h.service.get_portal_task(STUDENT, &id).await.unwrap().task.task_id, id);
}

#[tokio::test]
async fn test_upload_enforces_size_and_quota() {
    let h = harness();
    let detail = h.published_task("Scans", &[("ID", true)]).await;
    let id = detail.task.task_id.clone();
    let item_id = detail.items[0].item_id.clone();

    let empty = h.service.upload_file(STUDENT, &id, &item_id, upload("a.pdf", b"")).await;
    assert_eq!(empty.unwrap_err().code(), "BAD_REQUEST");
    let oversized = vec![0u8; 2048];
    let big = h.service.upload_file(STUDENT, &id, &item_id, upload("a.pdf", &oversized)).await;
    assert_eq!(big.unwrap_err().code(), "BAD_REQUEST");
    let unknown_item = h.service.upload_file(STUDENT, &id, "nope", upload("a.pdf", b"x")).await;
    assert_eq!(unknown_item.unwrap_err().code(), "NOT_FOUND");

    for n in 0..3 {
        let file = h
            .service
            .upload_file(STUDENT, &id, &item_id, upload(&format!("p{}.pdf", n), b"page"))
            .await
            .unwrap();
        assert_eq!(file.sort, n + 1);
        assert!(file
            .file_key
            .starts_with(&format!("{}/tasks/{}/users/{}/items/{}/", MODULE, id, STUDENT, item_id)));
    }
    let over = h
        .service
        .upload_file(STUDENT, &id, &item_id, upload("p4.pdf", b"page"))
        .await
        .unwrap_err();
    assert_eq!(over.code(), "BAD_REQUEST");
    assert!(over.to_string().contains("at most 3"));

    let detail = h.service.get_portal_task(STUDENT, &id).await.unwrap();
    assert_eq!(detail.files.len(), 3);
    assert_eq!(h.blobs.len(), 3);
}

#[tokio::test]
async fn test_storage_failure_leaves_no_row() {
    let h = harness();
    let detail = h.published_task("Scans", &[("ID", true)]).await;
    let id = detail.task.task_id.clone();
    h.blobs.fail_uploads.store(true, Ordering::SeqCst);

    let err = h
        .service
        .upload_file(STUDENT, &id, &detail.items[0].item_id, upload("a.pdf", b"data"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BAD_REQUEST");
    let portal = h.service.get_portal_task(STUDENT, &id).await.unwrap();
    assert!(portal.files.is_empty());
    assert!(portal.submission.is_none());
    assert!(h.db.submissions_of(&id).is_empty());
}

#[tokio::test]
async fn test_failed_upload_keeps_withdrawn_submission_withdrawn() {
    let h = harness();
    let detail = h.published_task("Scans", &[("ID", true)]).await;
    let id = detail.task.task_id.clone();
    let item_id = detail.items[0].item_id.clone();
    h.service.upload_file(STUDENT, &id, &item_id, upload("a.pdf", b"a")).await.unwrap();
    h.service.submit(STUDENT, &id).await.unwrap();
    h.service.withdraw(STUDENT, &id).await.unwrap();

    h.blobs.fail_uploads.store(true, Ordering::SeqCst);
    let err = h
        .service
        .upload_file(STUDENT, &id, &item_id, upload("b.pdf", b"b"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BAD_REQUEST");
    assert!(h.db.submissions_of(&id)[0].withdrawn_at.is_some());
}

#[tokio::test]
async fn test_submit_requires_every_required_item() {
    let h = harness();
    let detail = h
        .published_task("Enrollment", &[("ID card", true), ("Photo", true), ("Notes", false)])
        .await;
    let id = detail.task.task_id.clone();
    let id_card = detail.items.iter().find(|i| i.title == "ID card").unwrap().item_id.clone();
    let photo = detail.items.iter().find(|i| i.title == "Photo").unwrap().item_id.clone();

    match h.service.submit(STUDENT, &id).await.unwrap_err() {
        collect_block::CollectError::MissingRequired { titles, .. } => {
            assert_eq!(titles, vec!["ID card".to_string(), "Photo".to_string()]);
        }
        other => panic!("unexpected error {:?}", other),
    }

    h.service.upload_file(STUDENT, &id, &id_card, upload("id.jpg", b"id")).await.unwrap();
    let err = h.service.submit(STUDENT, &id).await.unwrap_err();
    assert_eq!(err.code(), "MISSING_REQUIRED");
    assert!(err.to_string().contains("Photo"));

    h.service.upload_file(STUDENT, &id, &photo, upload("me.jpg", b"me")).await.unwrap();
    let before = chrono::Utc::now();
    let submitted = h.service.submit(STUDENT, &id).await.unwrap();
    assert!(submitted.submitted_at.unwrap() >= before);
    assert_eq!(submitted.status, SubmissionStatus::Pending);

    let summary = h.service.list_portal_tasks(STUDENT).await.unwrap();
    let mine = summary[0].submission.as_ref().unwrap();
    assert!(!mine.missing_required);
    assert_eq!(mine.file_count, 2);
}

#[tokio::test]
async fn test_withdraw_clears_files_and_allows_resubmission() {
    let h = harness();
    let detail = h.published_task("Scans", &[("ID", true)]).await;
    let id = detail.task.task_id.clone();
    let item_id = detail.items[0].item_id.clone();

    h.service.upload_file(STUDENT, &id, &item_id, upload("a.pdf", b"a")).await.unwrap();
    assert_eq!(h.service.withdraw(STUDENT, &id).await.unwrap_err().code(), "CONFLICT");

    h.service.submit(STUDENT, &id).await.unwrap();
    let withdrawn = h.service.withdraw(STUDENT, &id).await.unwrap();
    assert!(withdrawn.withdrawn_at.is_some());
    assert!(withdrawn.submitted_at.is_none());
    assert!(h.db.submission_files(&withdrawn.submission_id).is_empty());
    assert_eq!(h.blobs.len(), 0);

    // A second withdraw is a no-op.
    assert!(h.service.withdraw(STUDENT, &id).await.unwrap().withdrawn_at.is_some());

    h.service.upload_file(STUDENT, &id, &item_id, upload("b.pdf", b"b")).await.unwrap();
    let revived = h.service.get_portal_task(STUDENT, &id).await.unwrap();
    let submission = revived.submission.unwrap();
    assert_eq!(submission.submission_id, withdrawn.submission_id);
    assert!(submission.withdrawn_at.is_none());
    assert!(h.service.submit(STUDENT, &id).await.unwrap().submitted_at.is_some());
}

#[tokio::test]
async fn test_deadline_and_closing_freeze_the_portal() {
    let h = harness();
    let detail = h.published_task("Scans", &[("ID", true)]).await;
    let id = detail.task.task_id.clone();
    let item_id = detail.items[0].item_id.clone();
    let file = h
        .service
        .upload_file(STUDENT, &id, &item_id, upload("a.pdf", b"a"))
        .await
        .unwrap();

    h.service.update_due_at_only(STAFF, &id, Some(in_days(-1))).await.unwrap();
    let late = h.service.upload_file(STUDENT, &id, &item_id, upload("b.pdf", b"b")).await.unwrap_err();
    assert_eq!(late.code(), "CONFLICT");
    assert!(late.to_string().contains("deadline"));
    assert_eq!(h.service.submit(STUDENT, &id).await.unwrap_err().code(), "CONFLICT");
    assert_eq!(
        h.service.delete_file(STUDENT, &id, &file.file_id).await.unwrap_err().code(),
        "CONFLICT"
    );

    h.service.update_due_at_only(STAFF, &id, Some(in_days(1))).await.unwrap();
    h.service.close_task(STAFF, &id).await.unwrap();
    let detail = h.service.get_portal_task(STUDENT, &id).await.unwrap();
    assert!(!detail.accepting_submissions);
    assert_eq!(h.service.submit(STUDENT, &id).await.unwrap_err().code(), "CONFLICT");
    // Own files stay downloadable after close.
    let url = h.service.my_file_download_url(STUDENT, &id, &file.file_id).await.unwrap();
    assert_eq!(url.url, format!("{}{}", common::URL_SCHEME, file.file_key));
}

#[tokio::test]
async fn test_delete_file_only_touches_own_files() {
    let h = harness();
    let detail = h.published_task("Scans", &[("ID", true)]).await;
    let id = detail.task.task_id.clone();
    let item_id = detail.items[0].item_id.clone();
    let mine = h.service.upload_file(STUDENT, &id, &item_id, upload("a.pdf", b"a")).await.unwrap();
    let theirs = h.service.upload_file("stu-2", &id, &item_id, upload("b.pdf", b"b")).await.unwrap();

    assert_eq!(
        h.service.delete_file(STUDENT, &id, &theirs.file_id).await.unwrap_err().code(),
        "NOT_FOUND"
    );
    h.service.delete_file(STUDENT, &id, &mine.file_id).await.unwrap();
    assert_eq!(h.blobs.keys(), vec![theirs.file_key.clone()]);
    assert!(h.service.get_portal_task(STUDENT, &id).await.unwrap().files.is_empty());
}

#[tokio::test]
async fn test_template_download_for_students() {
    let h = harness();
    let detail = h.published_task("Forms", &[("Form", true), ("Photo", false)]).await;
    let id = detail.task.task_id.clone();
    let form = detail.items.iter().find(|i| i.title == "Form").unwrap().item_id.clone();
    let photo = detail.items.iter().find(|i| i.title == "Photo").unwrap().item_id.clone();
    let item = h
        .service
        .upload_item_template(STAFF, &id, &form, upload("blank.docx", b"blank"))
        .await
        .unwrap();

    let url = h.service.item_template_download_url(STUDENT, &id, &form).await.unwrap();
    assert_eq!(url.url, format!("{}{}", common::URL_SCHEME, item.template.unwrap().file_key));
    assert_eq!(url.expires_in_secs, 60);
    assert_eq!(
        h.service.item_template_download_url(STUDENT, &id, &photo).await.unwrap_err().code(),
        "NOT_FOUND"
    );
}
