use std::sync::Arc;

use crate::application::domain_validation::DomainValidationService;
use crate::application::posts::PostWriteService;
use crate::application::tokens::TokenService;
use crate::application::uploads::UploadService;

use super::rate_limit::ApiRateLimiter;

#[derive(Clone)]
pub struct ApiState {
    pub tokens: Arc<TokenService>,
    pub posts: Arc<PostWriteService>,
    pub domains: Arc<DomainValidationService>,
    pub uploads: Arc<UploadService>,
    pub rate_limiter: Arc<ApiRateLimiter>,
}
