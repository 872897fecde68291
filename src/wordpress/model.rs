use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct Tag {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Deserialize, Debug)]
pub struct CreatedPost {
    pub id: u64,
    pub link: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct Media {
    pub id: u64,
    pub source_url: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct CurrentUser {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}
