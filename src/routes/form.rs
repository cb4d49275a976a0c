use axum::extract::Multipart;

use crate::routes::error::ApiResult;

/// Fields read from an image upload form.
#[derive(Debug, Default)]
pub struct ImageForm {
    /// Bytes of the `image` part. Empty parts are treated as absent.
    pub image: Option<Vec<u8>>,
    /// Raw `prompt_id` value, if sent.
    pub prompt_id: Option<String>,
}

/// Read an upload form, ignoring fields other than `image` and `prompt_id`.
pub async fn read_image_form(mut multipart: Multipart) -> ApiResult<ImageForm> {
    let mut form = ImageForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("image") => {
                let data = field.bytes().await?;
                if !data.is_empty() {
                    form.image = Some(data.to_vec());
                }
            }
            Some("prompt_id") => {
                form.prompt_id = Some(field.text().await?);
            }
            _ => {}
        }
    }

    Ok(form)
}
