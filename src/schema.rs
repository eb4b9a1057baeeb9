table! {
    model_version (id) {
        id -> Int8,
        name -> Text,
        weights_path -> Text,
        created_at -> Timestamptz,
    }
}

table! {
    inference_job (id) {
        id -> Int8,
        status -> Text,
        input_sha256 -> Text,
        model_version_id -> Int8,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    inference_result (job_id) {
        job_id -> Int8,
        output -> Jsonb,
        top_label -> Text,
        created_at -> Timestamptz,
    }
}

joinable!(inference_job -> model_version (model_version_id));
joinable!(inference_result -> inference_job (job_id));

allow_tables_to_appear_in_same_query!(model_version, inference_job, inference_result,);
