//! User and blog provisioning.

use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use thiserror::Error;
use uuid::Uuid;

use crate::application::posts::{PostWriteError, PostWriteService};
use crate::application::render::MarkdownRenderer;
use crate::application::repos::{
    BlogsRepo, CreateBlogParams, CreateUserParams, RepoError, UpdateBlogParams, UsersRepo,
};
use crate::domain::blogs::{BlogSettings, DEFAULT_THEME, MAX_BLOGS_PER_USER};
use crate::domain::entities::{BlogRecord, UserRecord};
use crate::domain::error::ValidationErrors;
use crate::domain::users::{normalize_email, validate_new_user};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("{0}")]
    Validation(ValidationErrors),
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
    #[error("user `{0}` not found")]
    UnknownUser(String),
    #[error("failed to create the about page: {0}")]
    AboutPage(#[source] Box<PostWriteError>),
}

impl From<ValidationErrors> for AccountError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UsersRepo>,
    blogs: Arc<dyn BlogsRepo>,
    posts: PostWriteService,
    renderer: Arc<dyn MarkdownRenderer>,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UsersRepo>,
        blogs: Arc<dyn BlogsRepo>,
        posts: PostWriteService,
        renderer: Arc<dyn MarkdownRenderer>,
    ) -> Self {
        Self {
            users,
            blogs,
            posts,
            renderer,
        }
    }

    pub async fn create_user(
        &self,
        email: &str,
        name: &str,
        password: &str,
    ) -> Result<UserRecord, AccountError> {
        let email = normalize_email(email);
        let name = name.trim();
        let mut errors = validate_new_user(&email, name, password);
        if errors.is_empty() && self.users.find_user_by_email(&email).await?.is_some() {
            errors.add("email", "has already been taken");
        }
        errors.into_result()?;

        let password_hash = hash_password(password)?;
        let user = self
            .users
            .create_user(CreateUserParams {
                email,
                name: name.to_string(),
                password_hash,
            })
            .await
            .map_err(|err| match err {
                RepoError::Duplicate { .. } => {
                    let mut errors = ValidationErrors::new();
                    errors.add("email", "has already been taken");
                    AccountError::Validation(errors)
                }
                other => AccountError::Repo(other),
            })?;

        tracing::info!(target = "willow::application::accounts", user_id = %user.id, "Created user");
        Ok(user)
    }

    pub async fn find_user(&self, email: &str) -> Result<UserRecord, AccountError> {
        let email = normalize_email(email);
        self.users
            .find_user_by_email(&email)
            .await?
            .ok_or(AccountError::UnknownUser(email))
    }

    /// `Ok(None)` for an unknown email or a wrong password.
    pub async fn verify_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<UserRecord>, AccountError> {
        let Some(user) = self.users.find_user_by_email(&normalize_email(email)).await? else {
            return Ok(None);
        };
        Ok(password_matches(&user.password_hash, password).then_some(user))
    }

    pub async fn create_blog(
        &self,
        user: &UserRecord,
        settings: BlogSettings,
    ) -> Result<BlogRecord, AccountError> {
        let settings = settings.normalized();
        let existing = self.blogs.list_for_user(user.id).await?;

        let mut errors = settings.validate();
        if i64::try_from(existing.len()).unwrap_or(i64::MAX) >= MAX_BLOGS_PER_USER {
            errors.add_base(format!(
                "User cannot have more than {MAX_BLOGS_PER_USER} blogs"
            ));
        }
        self.check_uniqueness(&settings, None, &mut errors).await?;
        if settings.primary && existing.iter().any(|blog| blog.primary) {
            errors.add("primary", "can only have one primary blog per user");
        }
        errors.into_result()?;

        let post_footer_html = self.render_footer(&settings);
        let blog = self
            .blogs
            .create_blog(CreateBlogParams {
                user_id: user.id,
                subdomain: settings.subdomain,
                title: settings.title,
                meta_description: settings.meta_description,
                favicon_emoji: settings.favicon_emoji,
                custom_domain: settings.custom_domain,
                theme: settings.theme.unwrap_or_else(|| DEFAULT_THEME.to_string()),
                post_footer_markdown: settings.post_footer_markdown,
                post_footer_html,
                no_index: settings.no_index,
                primary: settings.primary,
            })
            .await?;

        self.posts
            .create_about_page(&blog)
            .await
            .map_err(|err| AccountError::AboutPage(Box::new(err)))?;

        tracing::info!(
            target = "willow::application::accounts",
            user_id = %user.id,
            blog_id = %blog.id,
            subdomain = %blog.subdomain,
            "Created blog"
        );
        Ok(blog)
    }

    pub async fn update_blog_settings(
        &self,
        blog: &BlogRecord,
        settings: BlogSettings,
    ) -> Result<BlogRecord, AccountError> {
        let settings = settings.normalized();
        let mut errors = settings.validate();
        self.check_uniqueness(&settings, Some(blog.id), &mut errors).await?;
        if settings.primary {
            let others = self.blogs.list_for_user(blog.user_id).await?;
            if others.iter().any(|other| other.primary && other.id != blog.id) {
                errors.add("primary", "can only have one primary blog per user");
            }
        }
        errors.into_result()?;

        let post_footer_html = self.render_footer(&settings);
        Ok(self
            .blogs
            .update_blog(UpdateBlogParams {
                id: blog.id,
                subdomain: settings.subdomain,
                title: settings.title,
                meta_description: settings.meta_description,
                favicon_emoji: settings.favicon_emoji,
                custom_domain: settings.custom_domain,
                theme: settings.theme.unwrap_or_else(|| blog.theme.clone()),
                post_footer_markdown: settings.post_footer_markdown,
                post_footer_html,
                no_index: settings.no_index,
                primary: settings.primary,
            })
            .await?)
    }

    async fn check_uniqueness(
        &self,
        settings: &BlogSettings,
        current: Option<Uuid>,
        errors: &mut ValidationErrors,
    ) -> Result<(), AccountError> {
        let is_other = |blog: &BlogRecord| Some(blog.id) != current;

        if !errors.contains("subdomain")
            && let Some(taken) = self.blogs.find_by_subdomain(&settings.subdomain).await?
            && is_other(&taken)
        {
            errors.add("subdomain", "has already been taken");
        }
        if let Some(domain) = settings.custom_domain.as_deref()
            && !errors.contains("custom_domain")
            && let Some(taken) = self.blogs.find_by_custom_domain(domain).await?
            && is_other(&taken)
        {
            errors.add("custom_domain", "has already been taken");
        }
        Ok(())
    }

    fn render_footer(&self, settings: &BlogSettings) -> Option<String> {
        settings
            .post_footer_markdown
            .as_deref()
            .and_then(|markdown| self.renderer.render_markdown(markdown))
    }
}

fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AccountError::PasswordHash(err.to_string()))
}

fn password_matches(hash: &str, password: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}
