use chrono::{DateTime, Utc};
use groups_client::{Group, ListSnapshot, Member, Page, Post, Profile};

pub fn print_group(group: &Group) {
    let visibility = if group.is_public { "public" } else { "private" };
    println!("{} [{}]", group.name, visibility);
    println!("id: {}", group.id);
    println!("slug: {}", group.slug);
    if !group.description.is_empty() {
        println!("description: {}", group.description);
    }
    println!(
        "members: {}, posts: {}",
        group.members_count, group.posts_count
    );
    match (&group.user_role, group.is_member) {
        (Some(role), _) => println!("membership: {role:?}"),
        (None, true) => println!("membership: member"),
        (None, false) => println!("membership: -"),
    }
}

pub fn print_post(post: &Post, known: Option<&Group>) {
    let group = post
        .group_summary(known)
        .map(|summary| format!(" in {}", summary.name))
        .unwrap_or_default();
    println!(
        "- [{}] {} by {}{}{}",
        post.id,
        post.title,
        post.author_name(),
        group,
        format_date(post.created_at)
    );
    if !post.content.is_empty() {
        println!("    {}", post.content);
    }
}

pub fn print_posts(posts: &[Post], known: Option<&Group>) {
    if posts.is_empty() {
        println!("Постов пока нет.");
        return;
    }
    for post in posts {
        print_post(post, known);
    }
}

pub fn print_group_line(group: &Group) {
    let marker = if group.is_member { "*" } else { " " };
    println!(
        "{marker} [{}] {} ({}) - {} members",
        group.id, group.name, group.slug, group.members_count
    );
}

/// Печатает страницу списка или ошибку; прежняя страница при ошибке не теряется.
pub fn print_snapshot<T>(snapshot: &ListSnapshot<T>, noun: &str, item: impl Fn(&T)) {
    if let Some(error) = &snapshot.error {
        eprintln!("{error}");
    }
    let Some(page) = &snapshot.page else {
        return;
    };
    if page.is_empty() {
        println!("Ничего не найдено ({noun}).");
    } else {
        for entry in &page.items {
            item(entry);
        }
        println!("Showing {} of {} {noun}", page.items.len(), page.total_count);
    }
    print_cursors(page);
}

fn print_cursors<T>(page: &Page<T>) {
    if let Some(previous) = &page.previous_cursor {
        println!("previous: --cursor {}", previous.as_str());
    }
    if let Some(next) = &page.next_cursor {
        println!("next: --cursor {}", next.as_str());
    }
}

pub fn print_profile(profile: &Profile) {
    println!("{} ({})", profile.username, profile.initials());
    println!("id: {}", profile.id);
    let full_name = [profile.first_name.as_deref(), profile.last_name.as_deref()]
        .into_iter()
        .flatten()
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if !full_name.is_empty() {
        println!("name: {full_name}");
    }
    if let Some(bio) = profile.bio.as_deref().filter(|bio| !bio.trim().is_empty()) {
        println!("bio: {bio}");
    }
    println!("joined: {}", profile.date_joined.format("%Y-%m-%d"));
}

pub fn print_members(members: &[Member]) {
    if members.is_empty() {
        println!("No members found");
        return;
    }
    for member in members {
        let role = member.role.as_deref().unwrap_or("member");
        println!("- [{}] {} ({role})", member.user.id, member.user.username);
    }
}

fn format_date(date: Option<DateTime<Utc>>) -> String {
    date.map(|date| format!(", {}", date.format("%Y-%m-%d %H:%M")))
        .unwrap_or_default()
}
