table! {
    video (id) {
        id -> Uuid,
        fk_owner -> Uuid,
        title -> Varchar,
        description -> Nullable<Text>,
        thumbnail_url -> Nullable<Varchar>,
        video_url -> Nullable<Varchar>,
        creation_timestamp -> Timestamptz,
    }
}
