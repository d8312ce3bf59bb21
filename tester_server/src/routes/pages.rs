//! Server-rendered HTML for the installation flow.

use crate::services::github_service::InstallationDetails;
use crate::services::setup_service::SetupReport;

const STYLE: &str = r#"
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Helvetica, Arial, sans-serif; background: #f6f8fa; margin: 0; padding: 40px 0; }
.container { background: white; padding: 32px 40px; border-radius: 12px; box-shadow: 0 8px 24px rgba(140, 149, 159, 0.2); max-width: 720px; margin: 0 auto; }
h1 { color: #24292e; font-size: 24px; }
p, li { color: #586069; line-height: 1.5; }
fieldset { border: 1px solid #e1e4e8; border-radius: 6px; margin-bottom: 16px; }
label { display: block; margin: 6px 0; }
.btn { background: #24292e; color: white; padding: 12px 24px; border: none; border-radius: 6px; font-size: 16px; text-decoration: none; display: inline-block; cursor: pointer; }
.ok { color: #28a745; }
.fail { color: #cb2431; }
"#;

const LANGUAGES: [&str; 6] = ["Python", "JavaScript", "TypeScript", "Java", "C++", "C#"];

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <title>{}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n\
         <div class=\"container\">\n{body}\n</div>\n</body>\n</html>\n",
        escape_html(title)
    )
}

pub fn login_page(install_url: &str) -> String {
    page(
        "Compiler Tester - GitHub Login",
        &format!(
            "<h1>Compiler Tester</h1>\n\
             <p>Connect your GitHub repositories to automatically test compilation on new releases.</p>\n\
             <a href=\"{}\" class=\"btn\">Install on GitHub</a>\n\
             <ul>\n<li>Automatic compilation testing on tag creation</li>\n\
             <li>Build status badges</li>\n<li>Issues opened for rejected tags and failed builds</li>\n</ul>",
            escape_html(install_url)
        ),
    )
}

fn repository_fieldset(owner: &str, name: &str) -> String {
    let owner = escape_html(owner);
    let name = escape_html(name);
    let options: String = LANGUAGES
        .iter()
        .map(|l| format!("<option value=\"{0}\">{0}</option>", escape_html(l)))
        .collect();
    format!(
        "<fieldset>\n<legend>{owner}/{name}</legend>\n\
         <input type=\"hidden\" name=\"git_username[]\" value=\"{owner}\">\n\
         <input type=\"hidden\" name=\"repository_name[]\" value=\"{name}\">\n\
         <label>Name <input type=\"text\" name=\"name[]\" required></label>\n\
         <label>Email <input type=\"email\" name=\"email[]\" required></label>\n\
         <label>Language <select name=\"language[]\">{options}</select></label>\n\
         <label><input type=\"radio\" name=\"course_{name}\" value=\"EngComp\" required> Engenharia de Computação</label>\n\
         <label><input type=\"radio\" name=\"course_{name}\" value=\"CieComp\"> Ciência da Computação</label>\n\
         </fieldset>"
    )
}

pub fn setup_page(installation_id: i64, details: &InstallationDetails) -> String {
    if details.repositories.is_empty() {
        return page(
            "Compiler Tester - Setup",
            "<h1>No repositories</h1>\n<p>The app has no access to any repository yet.</p>",
        );
    }

    let fieldsets: Vec<String> = details
        .repositories
        .iter()
        .filter_map(|r| crate::models::repository::split_full_name(&r.full_name))
        .map(|(owner, name)| repository_fieldset(owner, name))
        .collect();

    page(
        "Compiler Tester - Setup",
        &format!(
            "<h1>Set up your repositories</h1>\n\
             <p>Installed for <strong>{}</strong>.</p>\n\
             <form method=\"post\" action=\"/setup/save\">\n\
             <input type=\"hidden\" name=\"installation_id\" value=\"{installation_id}\">\n\
             {}\n\
             <label><input type=\"checkbox\" name=\"add_badges\" value=\"true\" checked> \
             Add a status badge to each README</label>\n\
             <button type=\"submit\" class=\"btn\">Save</button>\n</form>",
            escape_html(&details.account.login),
            fieldsets.join("\n")
        ),
    )
}

pub fn setup_report_page(report: &SetupReport) -> String {
    let configured = if report.configured.is_empty() {
        "<p>No repositories were successfully configured.</p>".to_string()
    } else {
        let items: String = report
            .configured
            .iter()
            .map(|r| format!("<li class=\"ok\">{}</li>", escape_html(r)))
            .collect();
        format!("<ul>{items}</ul>")
    };
    let failed: String = report
        .failed
        .iter()
        .map(|r| format!("<li class=\"fail\">{}</li>", escape_html(r)))
        .collect();
    let failed = if failed.is_empty() {
        String::new()
    } else {
        format!("<h2>Not configured</h2>\n<ul>{failed}</ul>")
    };

    let badges = if !report.add_badges {
        String::new()
    } else if report.badges.is_empty() {
        "<p><strong>Badge Addition:</strong> No badges were processed</p>".to_string()
    } else {
        let added = report.badges.iter().filter(|(_, ok)| *ok).count();
        let missing: Vec<String> = report
            .badges
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(r, _)| escape_html(r))
            .collect();
        let mut html = format!(
            "<p><strong>Badge Addition:</strong> {added}/{} badges added successfully</p>",
            report.badges.len()
        );
        if !missing.is_empty() {
            html.push_str(&format!(
                "<p>Failed to add badges to: {}</p>",
                missing.join(", ")
            ));
        }
        html
    };

    page(
        "Setup Complete",
        &format!("<h1>Setup Complete</h1>\n{configured}\n{failed}\n{badges}"),
    )
}

pub fn error_page(message: &str) -> String {
    page(
        "Compiler Tester - Error",
        &format!("<h1>Something went wrong</h1>\n<p>{}</p>", escape_html(message)),
    )
}
