mod common;

use common::{Call, RecordingDatastore};
use medicontent_qa::airtable::Table;
use medicontent_qa::model::Post;
use medicontent_qa::qa::{fetch_post, save, QaDraft, QaField};
use medicontent_qa::review::{fetch_completed, QaFilter, ReviewFilter};
use serde_json::json;

async fn seeded() -> RecordingDatastore {
    let datastore = RecordingDatastore::default();
    let rows = [
        ("rec1", json!({ "Post Id": "QA_one", "Title": "임플란트 후기", "Status": "작업 완료",
            "QA Reviewer": "김검수", "Content Score": 5, "Legal Score": 4, "QA Done": true })),
        ("rec2", json!({ "Post Id": "QA_two", "Title": "교정 일지", "Status": "작업 완료",
            "QA Reviewer": "박검수", "Content Score": 3, "Legal Score": 1, "QA Done": true })),
        ("rec3", json!({ "Post Id": "QA_three", "Title": "임플란트 주의", "Status": "작업 완료" })),
        ("rec4", json!({ "Post Id": "QA_four", "Title": "진행 중 글", "Status": "리걸케어 작업 중" })),
        ("rec5", json!({ "Post Id": "QA_five", "Title": "임플란트 재시술", "Status": "작업 완료",
            "QA Reviewer": "김검수", "Content Score": 4, "QA Done": true })),
    ];
    for (id, fields) in rows {
        datastore.seed(Table::Posts, id, fields).await;
    }
    datastore
}

fn ids(posts: &[&Post]) -> Vec<String> {
    let mut ids: Vec<String> = posts.iter().map(|p| p.post_id.clone()).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn only_completed_posts_are_listed() {
    let datastore = seeded().await;
    let posts = fetch_completed(&datastore).await.unwrap();
    assert_eq!(posts.len(), 4);
    assert!(posts.iter().all(|p| p.status.is_complete()));
}

#[tokio::test]
async fn filters_commute() {
    let datastore = seeded().await;
    let posts = fetch_completed(&datastore).await.unwrap();

    let search = ReviewFilter {
        search: Some("임플란트".into()),
        ..Default::default()
    };
    let qa_done = ReviewFilter {
        qa: QaFilter::Done,
        ..Default::default()
    };
    let reviewer = ReviewFilter {
        reviewer: Some("김검수".into()),
        ..Default::default()
    };
    let content = ReviewFilter {
        content_score: Some("4".parse().unwrap()),
        ..Default::default()
    };
    let all = ReviewFilter {
        search: search.search.clone(),
        qa: qa_done.qa,
        reviewer: reviewer.reviewer.clone(),
        content_score: content.content_score,
        legal_score: None,
    };

    let chain = |order: &[&ReviewFilter]| -> Vec<String> {
        let mut current: Vec<&Post> = posts.iter().collect();
        for f in order {
            current.retain(|p| f.matches(p));
        }
        ids(&current)
    };

    let expected = ids(&all.apply(&posts));
    assert_eq!(expected, vec!["QA_five".to_string(), "QA_one".to_string()]);
    assert_eq!(chain(&[&search, &qa_done, &reviewer, &content]), expected);
    assert_eq!(chain(&[&content, &reviewer, &qa_done, &search]), expected);
    assert_eq!(chain(&[&reviewer, &search, &content, &qa_done]), expected);
    // idempotent
    assert_eq!(chain(&[&all, &all]), expected);
}

#[tokio::test]
async fn legal_range_excludes_unscored_posts() {
    let datastore = seeded().await;
    let posts = fetch_completed(&datastore).await.unwrap();
    let filter = ReviewFilter {
        legal_score: Some("1-4".parse().unwrap()),
        ..Default::default()
    };
    assert_eq!(
        ids(&filter.apply(&posts)),
        vec!["QA_one".to_string(), "QA_two".to_string()]
    );
}

#[tokio::test]
async fn content_save_leaves_legal_review_untouched() {
    let datastore = seeded().await;
    let post = fetch_post(&datastore, "rec2").await.unwrap().unwrap();
    let mut draft = QaDraft::from_post(&post);
    draft.content_review = "도입부 보완".into();
    draft.content_score = Some(4);
    draft.legal_review = "unsaved legal edit".into();

    let saved = save(&datastore, "rec2", &draft, QaField::Content).await.unwrap();

    assert_eq!(saved.qa.content_review, "도입부 보완");
    assert_eq!(saved.qa.content_score, Some(4));
    assert_eq!(saved.qa.legal_review, "");
    assert_eq!(saved.qa.legal_score, Some(1));
    match datastore.calls().await.last() {
        Some(Call::Update { fields, record_id, .. }) => {
            assert_eq!(record_id, "rec2");
            assert!(!fields.contains_key("Legal Review"));
            assert!(!fields.contains_key("Legal Score"));
        }
        other => panic!("unexpected call {:?}", other),
    };
}

#[tokio::test]
async fn score_only_save_keeps_stored_review_text() {
    let datastore = seeded().await;
    datastore
        .set_fields(Table::Posts, "rec2", json!({ "Content Review": "사례 설명 충분" }))
        .await;
    let post = fetch_post(&datastore, "rec2").await.unwrap().unwrap();
    let mut draft = QaDraft::from_post(&post);
    draft.apply(QaField::Content, None, Some(4));

    let saved = save(&datastore, "rec2", &draft, QaField::Content).await.unwrap();

    assert_eq!(saved.qa.content_review, "사례 설명 충분");
    assert_eq!(saved.qa.content_score, Some(4));
    match datastore.calls().await.last() {
        Some(Call::Update { fields, .. }) => {
            assert_eq!(fields["Content Review"], "사례 설명 충분");
        }
        other => panic!("unexpected call {:?}", other),
    };
}

#[tokio::test]
async fn qa_done_is_recomputed_on_every_save() {
    let datastore = seeded().await;
    let post = fetch_post(&datastore, "rec3").await.unwrap().unwrap();
    assert!(!post.qa.qa_done);

    let mut draft = QaDraft::from_post(&post);
    draft.etc_review = "이미지 순서 확인".into();
    let saved = save(&datastore, "rec3", &draft, QaField::Etc).await.unwrap();
    assert!(saved.qa.qa_done);

    draft.etc_review.clear();
    let saved = save(&datastore, "rec3", &draft, QaField::Etc).await.unwrap();
    assert!(!saved.qa.qa_done);
}

#[tokio::test]
async fn unknown_record_id_is_none() {
    let datastore = seeded().await;
    assert!(fetch_post(&datastore, "recX").await.unwrap().is_none());
}
