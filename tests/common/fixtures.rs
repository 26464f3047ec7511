//! Mock gallery server fixtures

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Image served by the mock server
pub struct Image {
    pub id: u64,
    pub name: &'static str,
    pub body: &'static [u8],
}

pub const CAT: Image = Image {
    id: 1,
    name: "cat.jpg",
    body: b"cat bytes",
};

pub const DOG: Image = Image {
    id: 2,
    name: "dog.png",
    body: b"dog bytes",
};

/// Mount the JSON index of gallery `id` and its images
///
/// Each image expects exactly `downloads` requests, checked when the
/// server is dropped.
pub async fn mount_gallery(
    server: &MockServer,
    id: u64,
    title: &str,
    images: &[Image],
    related: &[u64],
    downloads: u64,
) {
    let uri = server.uri();
    let index = json!({
        "title": title,
        "images": images
            .iter()
            .map(|image| json!({"id": image.id, "url": format!("{uri}/img/{id}/{}", image.name)}))
            .collect::<Vec<_>>(),
        "related": related
            .iter()
            .map(|other| format!("{uri}/gallery/{other}"))
            .collect::<Vec<_>>(),
    });

    Mock::given(method("GET"))
        .and(path(format!("/gallery/{id}.json")))
        .respond_with(ResponseTemplate::new(200).set_body_json(index))
        .mount(server)
        .await;

    for image in images {
        Mock::given(method("GET"))
            .and(path(format!("/img/{id}/{}", image.name)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(image.body.to_vec()))
            .expect(downloads)
            .mount(server)
            .await;
    }
}

pub fn gallery_url(server: &MockServer, id: u64) -> String {
    format!("{}/gallery/{id}", server.uri())
}
